use axum::http::StatusCode;

use logiclinic_auth::{authorize, Permission};
use logiclinic_core::AggregateId;

use crate::app::errors;
use crate::context::PrincipalContext;

/// Permission gate; returns the ready-to-send 403 on refusal.
pub fn require(
    principal: &PrincipalContext,
    permission: &'static str,
) -> Result<(), axum::response::Response> {
    authorize(principal.principal(), &Permission::new(permission))
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "FORBIDDEN", e.to_string()))
}

pub fn parse_aggregate_id(
    raw: &str,
    what: &'static str,
) -> Result<AggregateId, axum::response::Response> {
    raw.parse::<AggregateId>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "INVALID_ID",
            format!("invalid {what} id"),
        )
    })
}
