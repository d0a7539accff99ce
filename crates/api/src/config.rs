//! Process configuration, resolved once at the binary edge.

/// API process configuration.
///
/// Built from the environment in `main` and injected; components never read
/// env vars themselves.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// When set, events persist to Postgres; otherwise everything runs in
    /// memory (dev/test).
    pub database_url: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        });

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret,
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }
}
