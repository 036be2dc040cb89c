//! sigrelay application.
//!
//! Orchestrates the ingestion pipeline:
//! - Relay source delivering raw messages
//! - Classification into signals and market notes
//! - Buffered, deduplicated persistence
//! - Live broadcast to subscribers
//! - Archive backfill on demand

pub mod app;
pub mod backfill;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use app::Application;
pub use backfill::ArchiveBackfill;
pub use config::{AppConfig, BackfillConfig, StorageBackend, StorageConfig, TelemetryConfig};
pub use error::{AppError, AppResult};
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
pub use storage::open_store;
