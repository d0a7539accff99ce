//! HTTP routes, one file per domain area.

pub mod billing;
pub mod common;
pub mod dispensations;
pub mod prescriptions;
pub mod stock;
pub mod system;
pub mod tariffs;

use axum::Router;

/// Protected routes (auth + clinic context required).
pub fn router() -> Router {
    Router::new()
        .nest("/pharmacy", stock::router())
        .nest("/prescriptions", prescriptions::router())
        .nest("/dispensations", dispensations::router())
        .nest("/billing", billing::router())
        .nest("/tariffs", tariffs::router())
}
