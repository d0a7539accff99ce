use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use logiclinic_core::Money;
use logiclinic_infra::aggregate_types;
use logiclinic_stock::{Lot, LotCommand, LotId, MedicationId, ReceiveLot};

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/lots", post(receive_lot).get(list_lots))
        .route("/lots/:id", get(get_lot))
        .route("/alerts", get(get_alerts))
}

pub async fn receive_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReceiveLotRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.stock.receive") {
        return resp;
    }

    let agg = logiclinic_core::AggregateId::new();
    let lot_id = LotId::new(agg);

    let cmd = LotCommand::ReceiveLot(ReceiveLot {
        clinic_id: clinic.clinic_id(),
        lot_id,
        medication_id: MedicationId::new(body.medication_id.into()),
        medication_label: body.medication_label,
        lot_number: body.lot_number,
        quantity: body.quantity,
        unit_cost: Money::from_francs(body.unit_cost),
        expires_at: body.expires_at,
        recorded_by: principal.principal().user_id,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Lot>(
        clinic.clinic_id(),
        agg,
        aggregate_types::LOT,
        cmd,
        |_clinic, id| Lot::empty(LotId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_lots(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.stock.read") {
        return resp;
    }

    let lots: Vec<_> = services
        .projections()
        .stock
        .list(clinic.clinic_id())
        .iter()
        .map(dto::lot_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "lots": lots }))).into_response()
}

pub async fn get_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.stock.read") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "lot") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections()
        .stock
        .get(clinic.clinic_id(), &LotId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::lot_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "lot not found"),
    }
}

pub async fn get_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.stock.read") {
        return resp;
    }

    let warning_days = services.policy().near_expiry_warning_days;
    let alerts = services
        .projections()
        .stock
        .alerts(clinic.clinic_id(), Utc::now(), warning_days);

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "expired": alerts.expired.iter().map(dto::lot_to_json).collect::<Vec<_>>(),
            "near_expiry": alerts.near_expiry.iter().map(|(lot, days)| serde_json::json!({
                "lot": dto::lot_to_json(lot),
                "days_to_expiry": days,
            })).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}
