//! HS256 token encoding/decoding on top of the claims model.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{validate_claims, JwtClaims, TokenValidationError};

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token decoding failed: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Validates a bearer token into claims.
///
/// Trait-shaped so the API layer can be tested with a stub validator.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// HS256 shared-secret validator (and, for dev/test tooling, encoder).
pub struct Hs256JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Sign a token for the given claims. Used by dev tooling and tests;
    /// production tokens come from the identity provider.
    pub fn encode(&self, claims: &JwtClaims) -> Result<String, JwtError> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let mut validation = Validation::default();
        // Expiry is checked by `validate_claims` against the caller's `now`
        // so tests control the clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<JwtClaims>(token, &self.decoding, &validation)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
