//! Runtime error types.

use crate::config::ConfigError;
use stateviz_core::CoreError;
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("interpreter service is not running")]
    ServiceClosed,
}

impl RuntimeError {
    /// Returns a stable error code suitable for display and scripting.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::Config(_) => "CONFIG_ERROR",
            RuntimeError::Io(_) => "IO_ERROR",
            RuntimeError::Json(_) => "BAD_REQUEST",
            RuntimeError::ServiceClosed => "SERVICE_CLOSED",
        }
    }

    /// Returns the core error, if this wraps one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            RuntimeError::Core(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = RuntimeError::from(CoreError::NonTerminatingTransientCycle {
            event: "GO".to_string(),
            limit: 3,
        });
        assert_eq!(err.error_code(), "TRANSIENT_CYCLE");
        assert!(err.as_core().is_some());
        assert_eq!(RuntimeError::ServiceClosed.error_code(), "SERVICE_CLOSED");
        assert!(RuntimeError::ServiceClosed.as_core().is_none());
    }
}
