use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use logiclinic_core::DomainError;
use logiclinic_infra::command_dispatcher::DispatchError;
use logiclinic_infra::pharmacy::WorkflowError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    let status = match &err {
        DispatchError::Concurrency(_) => StatusCode::CONFLICT,
        DispatchError::ClinicIsolation(_) => StatusCode::FORBIDDEN,
        DispatchError::Domain(domain) => match domain {
            DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound => StatusCode::NOT_FOUND,
            DomainError::Conflict(_) | DomainError::InsufficientStock { .. } => {
                StatusCode::CONFLICT
            }
            DomainError::InvariantViolation(_)
            | DomainError::LotExpired
            | DomainError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::Unauthorized => StatusCode::FORBIDDEN,
        },
        DispatchError::Deserialize(_) | DispatchError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DispatchError::Publish(_) => StatusCode::BAD_GATEWAY,
    };

    json_error(status, err.code(), err.to_string())
}

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    match err {
        WorkflowError::Dispatch(e) => dispatch_error_to_response(e),
        // The dispensation stays validated; only the ticket side effect is
        // pending. 502 tells the caller to retry the emission, not the
        // validation.
        WorkflowError::Tickets(e) => json_error(StatusCode::BAD_GATEWAY, e.code(), e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
