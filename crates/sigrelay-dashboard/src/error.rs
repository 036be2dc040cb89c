//! Dashboard error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Subscriber limit reached ({max})")]
    CapacityReached { max: usize },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;
