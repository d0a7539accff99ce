use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use logiclinic_core::Money;
use logiclinic_dispensation::{Coverage, DispensationId, InsurerRef};
use logiclinic_prescriptions::PrescriptionId;
use logiclinic_stock::LotId;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(begin))
        .route("/:id", get(get_dispensation))
        .route("/:id/lines", post(add_line))
        .route("/:id/finalize", post(finalize))
        .route("/:id/validate", post(validate))
        .route("/:id/cancel", post(cancel))
}

pub async fn begin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BeginDispensationRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }

    match services.begin_dispensation(
        clinic.clinic_id(),
        PrescriptionId::new(body.prescription_id.into()),
        principal.principal().user_id,
    ) {
        Ok(dispensation_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": dispensation_id.to_string(),
                "status": "en_cours",
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddLineRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "dispensation") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.add_dispensation_line(
        clinic.clinic_id(),
        DispensationId::new(agg),
        body.prescription_line_no,
        LotId::new(body.lot_id.into()),
        body.quantity,
    ) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(dto::add_line_outcome_to_json(&outcome)),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn finalize(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::FinalizeRequest>>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "dispensation") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let coverage = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .coverage
        .map(|c| Coverage {
            taux_couverture: c.taux_couverture,
            plafond: c.plafond.map(Money::from_francs),
            insurer: InsurerRef {
                insurer_id: c.insurer_id.into(),
                name: c.insurer_nom,
            },
        });

    match services.finalize_dispensation(
        clinic.clinic_id(),
        DispensationId::new(agg),
        coverage,
        principal.principal().user_id,
    ) {
        Ok(split) => (StatusCode::OK, Json(dto::split_to_json(&split))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn validate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "dispensation") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.validate_dispensation(clinic.clinic_id(), DispensationId::new(agg)) {
        Ok(tickets) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "validee",
                "tickets": tickets.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "dispensation") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.cancel_dispensation(
        clinic.clinic_id(),
        DispensationId::new(agg),
        body.and_then(|Json(b)| b.reason),
    ) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": agg.to_string(), "status": "annulee" })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_dispensation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pharmacy.dispense") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "dispensation") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections()
        .dispensations
        .get(clinic.clinic_id(), &DispensationId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::dispensation_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "dispensation not found"),
    }
}
