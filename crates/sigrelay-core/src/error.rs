//! Error types for sigrelay-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid setup type: {0}")]
    InvalidSetupType(String),

    #[error("Invalid message kind: {0}")]
    InvalidMessageKind(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
