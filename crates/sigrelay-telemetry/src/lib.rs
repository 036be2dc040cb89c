//! Prometheus metrics and structured logging for sigrelay.
//!
//! - `init_logging` installs the `tracing` subscriber (JSON in production)
//! - `Metrics` records pipeline, storage, broadcast and source counters
//!   and renders the Prometheus text exposition

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
