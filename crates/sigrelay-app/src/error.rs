//! Application error types.

use crate::pipeline::PipelineState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline is {actual}, expected {expected}")]
    InvalidState {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] sigrelay_persistence::PersistenceError),

    #[error("Source error: {0}")]
    Feed(#[from] sigrelay_feed::FeedError),

    #[error("Server error: {0}")]
    Server(#[from] sigrelay_dashboard::BroadcastError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sigrelay_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
