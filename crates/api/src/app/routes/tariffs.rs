use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;

use logiclinic_core::Money;
use logiclinic_infra::aggregate_types;
use logiclinic_pricing::{ClinicTariff, ServiceId, SetTariff, TariffCommand};

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(summary))
        .route("/:service_id", put(set_tariff).get(resolve))
}

pub async fn set_tariff(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(service_id): Path<String>,
    Json(body): Json<dto::SetTariffRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pricing.tariffs.set") {
        return resp;
    }
    let agg = match parse_aggregate_id(&service_id, "service") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let service_id = ServiceId::new(agg);
    let cmd = TariffCommand::SetTariff(SetTariff {
        clinic_id: clinic.clinic_id(),
        service_id,
        tarif: Money::from_francs(body.tarif),
        unite: body.unite.unwrap_or_else(|| "unité".to_string()),
        modified_by: principal.principal().user_id,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<ClinicTariff>(
        clinic.clinic_id(),
        agg,
        aggregate_types::CLINIC_TARIFF,
        cmd,
        |_clinic, id| ClinicTariff::empty(ServiceId::new(id)),
    ) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "service_id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pricing.tariffs.read") {
        return resp;
    }

    let entries: Vec<_> = services
        .resolver()
        .summary(clinic.clinic_id())
        .iter()
        .map(dto::tariff_summary_to_json)
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({ "tariffs": entries })),
    )
        .into_response()
}

pub async fn resolve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(service_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, "pricing.tariffs.read") {
        return resp;
    }
    let agg = match parse_aggregate_id(&service_id, "service") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .resolver()
        .resolve(clinic.clinic_id(), ServiceId::new(agg))
    {
        Some(resolved) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "service_id": agg.to_string(),
                "tarif": resolved.tarif.francs(),
                "source": resolved.source,
                "unite": resolved.unite,
            })),
        )
            .into_response(),
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no tariff configured for this service",
        ),
    }
}
