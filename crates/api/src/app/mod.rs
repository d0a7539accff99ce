//! HTTP application wiring (axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: infrastructure wiring (store/bus, projections, workflow)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses with stable codes

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use logiclinic_auth::{Hs256JwtValidator, JwtValidator};

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: ApiConfig) -> Router {
    let jwt: Arc<dyn JwtValidator> =
        Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(&config).await);

    // Protected routes: require auth + clinic context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use logiclinic_auth::{JwtClaims, Role};
    use logiclinic_core::{ClinicId, UserId};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    async fn test_app() -> Router {
        build_app(ApiConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: SECRET.to_string(),
            database_url: None,
        })
        .await
    }

    fn token_for(roles: Vec<Role>) -> String {
        let now = Utc::now().timestamp();
        let validator = Hs256JwtValidator::new(SECRET.as_bytes());
        validator
            .encode(&JwtClaims {
                sub: UserId::new(),
                clinic_id: ClinicId::new(),
                roles,
                iat: now - 10,
                exp: now + 3600,
            })
            .unwrap()
    }

    fn authed_post(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/pharmacy/lots")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn medecin_creates_prescriptions_caissier_cannot() {
        let app = test_app().await;
        let body = serde_json::json!({
            "patient_id": uuid::Uuid::now_v7(),
            "consultation_ref": "cons-1",
            "lines": [{
                "medication_id": uuid::Uuid::now_v7(),
                "medication_label": "Paracétamol 500mg",
                "quantity": 20,
            }],
        });

        let medecin = token_for(vec![Role::Medecin]);
        let response = app
            .clone()
            .oneshot(authed_post("/prescriptions", &medecin, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let caissier = token_for(vec![Role::Caissier]);
        let response = app
            .oneshot(authed_post("/prescriptions", &caissier, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn pharmacien_receives_a_lot() {
        let app = test_app().await;
        let pharmacien = token_for(vec![Role::Pharmacien]);

        let body = serde_json::json!({
            "medication_id": uuid::Uuid::now_v7(),
            "medication_label": "Amoxicilline 500mg",
            "lot_number": "LOT2026001",
            "quantity": 100,
            "unit_cost": 200,
            "expires_at": Utc::now() + chrono::Duration::days(365),
        });

        let response = app
            .oneshot(authed_post("/pharmacy/lots", &pharmacien, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn begin_requires_an_existing_prescription() {
        let app = test_app().await;
        let pharmacien = token_for(vec![Role::Pharmacien]);

        let body = serde_json::json!({ "prescription_id": uuid::Uuid::now_v7() });
        let response = app
            .oneshot(authed_post("/dispensations", &pharmacien, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
