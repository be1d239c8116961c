//! Core error types for WARDEN.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// Every failure a caller can observe falls into one of these kinds. Crate-level
/// errors convert into it so the HTTP layer only has one taxonomy to map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Missing or malformed input (model/policy grammar, required field, JSON)
    InvalidInput {
        /// What was wrong with the input
        reason: String,
    },

    /// Request hash did not verify
    AuthenticationFailed,

    /// The evaluation command ran and exited unsuccessfully
    ExecutionFailed {
        /// Diagnostic text reported by the command
        message: String,
    },

    /// Timeout
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Name not found in a registry
    NotFound {
        /// Kind of thing looked up
        kind: String,
        /// Name that was looked up
        name: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidInput`]
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CoreError::Internal`]
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the system
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::AuthenticationFailed | Self::NotFound { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { reason } => write!(f, "Invalid input: {}", reason),
            Self::AuthenticationFailed => write!(f, "Invalid authentication hash"),
            Self::ExecutionFailed { message } => write!(f, "Execution failed: {}", message),
            Self::Timeout { operation } => write!(f, "Timeout: {}", operation),
            Self::NotFound { kind, name } => write!(f, "{} not found: {}", kind, name),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}
