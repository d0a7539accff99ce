//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Business rule violation with a stable wire code.
///
/// These are the deterministic "workflow refused" outcomes of the
/// dispensing pipeline. The code is what API clients key on.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum BusinessRuleViolation {
    /// The prescription was cancelled and can never be dispensed again.
    #[error("prescription is cancelled")]
    PrescriptionCancelled,

    /// The prescription is older than the dispensing window allows.
    #[error("prescription is too old to dispense")]
    PrescriptionTooOld,

    /// Every line of the prescription is already fully dispensed.
    #[error("nothing left to dispense")]
    NothingToDispense,

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("invalid state transition")]
    InvalidStateTransition,
}

impl BusinessRuleViolation {
    /// Stable code rendered to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PrescriptionCancelled => "PRESCRIPTION_CANCELLED",
            Self::PrescriptionTooOld => "PRESCRIPTION_TOO_OLD",
            Self::NothingToDispense => "NOTHING_TO_DISPENSE",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
        }
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, stock shortfalls). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A lot cannot cover the requested quantity.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// The targeted lot is past its expiration date.
    #[error("lot expired")]
    LotExpired,

    /// A workflow business rule was violated.
    #[error("{0}")]
    BusinessRule(BusinessRuleViolation),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn rule(rule: BusinessRuleViolation) -> Self {
        Self::BusinessRule(rule)
    }

    /// Stable code rendered to callers (API error bodies, logs).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::InvalidId(_) => "INVALID_ID",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::LotExpired => "LOT_EXPIRED",
            Self::BusinessRule(rule) => rule.code(),
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}
