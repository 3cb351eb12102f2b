//! Domain error model.

use thiserror::Error;

use crate::quantity::Quantity;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is detected before any write happens. Post-completion
/// reconciliation problems are warnings, not errors, and never show up here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid order reference '{0}' (expected PED-YYYY-NNNN)")]
    InvalidReference(String),

    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock {
        available: Quantity,
        requested: Quantity,
    },

    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid driver document")]
    InvalidDocument,

    #[error("invalid vehicle plate '{0}'")]
    InvalidPlate(String),

    #[error("a non-blank reason is required to {0}")]
    MissingReason(&'static str),

    #[error("missing evidence: {}", .missing.join(", "))]
    MissingEvidence { missing: Vec<String> },

    #[error("unsupported file format '{0}'")]
    UnsupportedFormat(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("capacity exceeded: {requested} requested, {remaining} remaining")]
    CapacityExceeded {
        requested: Quantity,
        remaining: Quantity,
    },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found")]
    NotFound,

    /// Stale revision / lost optimistic-concurrency race.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape or range. The caller corrects and retries.
    Validation,
    /// The actor lacks the required role.
    Permission,
    /// The state graph does not allow the move.
    Transition,
    /// Retryable once the precondition is met (evidence, stock).
    Precondition,
    /// The allocation would overrun the release.
    Capacity,
    NotFound,
    Conflict,
}

impl DomainError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_date(msg: impl Into<String>) -> Self {
        Self::InvalidDate(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidQuantity(_)
            | DomainError::InvalidReference(_)
            | DomainError::InvalidDate(_)
            | DomainError::InvalidDocument
            | DomainError::InvalidPlate(_)
            | DomainError::MissingReason(_)
            | DomainError::UnsupportedFormat(_)
            | DomainError::MissingField(_)
            | DomainError::InvalidId(_) => ErrorKind::Validation,
            DomainError::Forbidden(_) => ErrorKind::Permission,
            DomainError::InvalidTransition { .. } => ErrorKind::Transition,
            DomainError::MissingEvidence { .. } | DomainError::InsufficientStock { .. } => {
                ErrorKind::Precondition
            }
            DomainError::CapacityExceeded { .. } => ErrorKind::Capacity,
            DomainError::NotFound => ErrorKind::NotFound,
            DomainError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_evidence_is_a_precondition_failure() {
        let err = DomainError::MissingEvidence {
            missing: vec!["invoice".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.to_string(), "missing evidence: invoice");
    }

    #[test]
    fn transition_helper_formats_states() {
        let err = DomainError::transition("loading", "completed", "in_progress");
        assert_eq!(err.kind(), ErrorKind::Transition);
        assert_eq!(err.to_string(), "invalid loading transition: completed -> in_progress");
    }
}
