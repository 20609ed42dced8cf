//! Core error types.

use thiserror::Error;

/// Errors from the statechart engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("transition failed: {reason}")]
    Transition { reason: String },

    #[error("guard '{guard}' failed: {reason}")]
    Guard { guard: String, reason: String },

    #[error("non-terminating transient cycle: event '{event}' exceeded {limit} internal steps")]
    NonTerminatingTransientCycle { event: String, limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn definition(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }

    pub(crate) fn transition(reason: impl Into<String>) -> Self {
        CoreError::Transition {
            reason: reason.into(),
        }
    }

    /// Returns whether the error was raised while loading a definition
    /// (as opposed to while interpreting an event).
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidDefinition { .. } | CoreError::InvalidGuard { .. } | CoreError::Json(_)
        )
    }

    /// Returns a stable error code suitable for display and scripting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidGuard { .. } => "INVALID_DEFINITION",
            CoreError::Transition { .. } => "TRANSITION_ERROR",
            CoreError::Guard { .. } => "GUARD_ERROR",
            CoreError::NonTerminatingTransientCycle { .. } => "TRANSIENT_CYCLE",
            CoreError::Json(_) => "INVALID_DEFINITION",
        }
    }
}
