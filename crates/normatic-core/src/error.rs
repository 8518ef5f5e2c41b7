//! Error types for NoRMatic

use thiserror::Error;

/// Core error type for NoRMatic operations
#[derive(Error, Debug)]
pub enum NormaticError {
    /// The factory could not open a connection for the target
    #[error("Connection unavailable for {target}: {reason}")]
    ConnectionUnavailable { target: String, reason: String },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Transport dead: {0}")]
    TransportDead(String),

    #[error("Invalid target descriptor: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl NormaticError {
    /// Build a `ConnectionUnavailable` error for a target
    pub fn unavailable(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionUnavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a caller-side retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NormaticError::ConnectionUnavailable { .. }
                | NormaticError::Io(_)
                | NormaticError::Timeout(_)
        )
    }
}

/// Result type alias for NoRMatic operations
pub type Result<T> = std::result::Result<T, NormaticError>;
