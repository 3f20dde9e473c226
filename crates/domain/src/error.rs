//! Error taxonomy shared by every safeguard component.

use thiserror::Error;

/// Result alias for safety operations.
pub type SafetyResult<T> = std::result::Result<T, SafetyError>;

/// Errors returned synchronously by the safety components.
///
/// Per-tick and per-event failures never surface as a `SafetyError` to the
/// monitoring loop or the event bus; they are logged and counted instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyError {
    /// A configuration update was rejected. No state was changed.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfiguration(Vec<String>),

    /// Unknown alert, operation or preset.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Illegal lifecycle move.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// A collaborator call exceeded its bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Re-registration of an existing identity.
    #[error("{kind} already registered: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// Exit placement failed.
    #[error("execution failed for {operation_id}: {reason}")]
    ExecutionFailed {
        operation_id: String,
        reason: String,
    },
}

impl SafetyError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        id: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if this error is a rejected configuration.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}
