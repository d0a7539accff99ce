use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use logiclinic_core::{ClinicId, UserId};

use crate::Role;

/// JWT claims model.
///
/// The minimal claim set expected once a token has been decoded and its
/// signature verified. `iat`/`exp` are unix seconds, per RFC 7519.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / authenticated staff user.
    pub sub: UserId,

    /// Clinic context for the token.
    pub clinic_id: ClinicId,

    /// Roles granted within the clinic.
    pub roles: Vec<Role>,

    /// Issued-at (unix seconds).
    pub iat: i64,

    /// Expiration (unix seconds).
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate JWT claims.
///
/// This validates the *claims* only; signature verification lives in the
/// `jwt` module.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            clinic_id: ClinicId::new(),
            roles: vec![Role::Pharmacien],
            iat,
            exp,
        }
    }

    #[test]
    fn valid_window_passes() {
        let now = Utc::now();
        let c = claims(now.timestamp() - 60, now.timestamp() + 3600);
        assert!(validate_claims(&c, now).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let c = claims(now.timestamp() - 7200, now.timestamp() - 3600);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::Expired));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let c = claims(now.timestamp() + 100, now.timestamp() + 50);
        assert_eq!(
            validate_claims(&c, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
