//! `logiclinic-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: claims come in, clinic context and
//! policy decisions come out.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use authorize::{authorize, role_permissions, AuthzError, Principal};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use roles::Role;
