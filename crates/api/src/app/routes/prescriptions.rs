use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use logiclinic_infra::aggregate_types;
use logiclinic_prescriptions::{
    CancelPrescription, CreatePrescription, PatientId, Prescription, PrescriptionCommand,
    PrescriptionId, PrescriptionLineSpec,
};
use logiclinic_stock::MedicationId;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_prescription))
        .route("/active", get(list_active))
        .route("/:id/cancel", post(cancel_prescription))
}

pub async fn create_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePrescriptionRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "prescriptions.create") {
        return resp;
    }

    let agg = logiclinic_core::AggregateId::new();
    let prescription_id = PrescriptionId::new(agg);

    let cmd = PrescriptionCommand::CreatePrescription(CreatePrescription {
        clinic_id: clinic.clinic_id(),
        prescription_id,
        patient_id: PatientId::new(body.patient_id.into()),
        consultation_ref: body.consultation_ref,
        lines: body
            .lines
            .into_iter()
            .map(|l| PrescriptionLineSpec {
                medication_id: MedicationId::new(l.medication_id.into()),
                medication_label: l.medication_label,
                quantity: l.quantity,
            })
            .collect(),
        prescribed_by: principal.principal().user_id,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Prescription>(
        clinic.clinic_id(),
        agg,
        aggregate_types::PRESCRIPTION,
        cmd,
        |_clinic, id| Prescription::empty(PrescriptionId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_active(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "prescriptions.read") {
        return resp;
    }

    let prescriptions: Vec<_> = services
        .projections()
        .prescriptions
        .list_active(clinic.clinic_id())
        .iter()
        .map(dto::prescription_to_json)
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({ "prescriptions": prescriptions })),
    )
        .into_response()
}

pub async fn cancel_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "prescriptions.cancel") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "prescription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = PrescriptionCommand::CancelPrescription(CancelPrescription {
        clinic_id: clinic.clinic_id(),
        prescription_id: PrescriptionId::new(agg),
        reason: body.and_then(|Json(b)| b.reason),
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Prescription>(
        clinic.clinic_id(),
        agg,
        aggregate_types::PRESCRIPTION,
        cmd,
        |_clinic, id| Prescription::empty(PrescriptionId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": agg.to_string(), "status": "ANNULE" })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
