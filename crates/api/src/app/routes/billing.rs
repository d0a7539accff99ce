use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use logiclinic_billing::{BillingTicket, BillingTicketId, SettleTicket, TicketCommand};
use logiclinic_infra::aggregate_types;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/tickets", get(list_tickets))
        .route("/tickets/:id/settle", post(settle_ticket))
        .route("/retry", post(retry_emissions))
}

#[derive(Debug, Deserialize, Default)]
pub struct TicketFilter {
    #[serde(default)]
    pub pending: bool,
}

pub async fn list_tickets(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<TicketFilter>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "billing.tickets.read") {
        return resp;
    }

    let projection = &services.projections().tickets;
    let tickets = if filter.pending {
        projection.list_pending(clinic.clinic_id())
    } else {
        projection.list(clinic.clinic_id())
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "tickets": tickets.iter().map(dto::ticket_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

pub async fn settle_ticket(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "billing.tickets.settle") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "ticket") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ticket_id = BillingTicketId::new(agg);
    let cmd = TicketCommand::SettleTicket(SettleTicket {
        clinic_id: clinic.clinic_id(),
        ticket_id,
        settled_by: principal.principal().user_id,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<BillingTicket>(
        clinic.clinic_id(),
        agg,
        aggregate_types::BILLING_TICKET,
        cmd,
        |_clinic, id| BillingTicket::empty(BillingTicketId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": agg.to_string(), "statut": "regle" })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn retry_emissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "billing.tickets.settle") {
        return resp;
    }

    match services.retry_pending_tickets() {
        Ok(tickets) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "opened": tickets.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
                "still_pending": services.pending_tickets().len(),
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::BAD_GATEWAY, e.code(), e.to_string()),
    }
}
