//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sigrelay_dashboard::DashboardConfig;
use sigrelay_feed::{RelayConfig, DEFAULT_FETCH_LIMIT};
use sigrelay_persistence::WriterConfig;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Config file used when neither `--config` nor `SIGRELAY_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Recommended flush interval range (seconds).
const FLUSH_INTERVAL_POLICY: (u64, u64) = (5, 20);
/// Recommended batch size range.
const BATCH_SIZE_POLICY: (usize, usize) = (10, 50);

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Local file, for development and tests.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// PostgreSQL connection string. Overridden by `DATABASE_URL`.
    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./data/sigrelay.db")
}

fn default_pool_max_size() -> usize {
    8
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_url: String::new(),
            sqlite_path: default_sqlite_path(),
            pool_max_size: default_pool_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Backfill (`GET /fetch-past`) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// JSON Lines export of past messages. Backfill is disabled when unset.
    #[serde(default)]
    pub archive_path: Option<PathBuf>,

    #[serde(default = "default_backfill_limit")]
    pub limit: usize,
}

fn default_backfill_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            archive_path: None,
            limit: default_backfill_limit(),
        }
    }
}

/// Logging and stats configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Seconds between pipeline stats log lines. 0 disables them.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: RelayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    pub backfill: BackfillConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Pick the config path: CLI argument, then `SIGRELAY_CONFIG`, then the default.
    pub fn resolve_path(cli: Option<String>) -> String {
        cli.or_else(|| std::env::var("SIGRELAY_CONFIG").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(url) = get("SIGRELAY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(token) = get("SIGRELAY_SOURCE_TOKEN") {
            self.source.auth_token = Some(token);
        }
        if let Some(channel) = get("SIGRELAY_SOURCE_CHANNEL") {
            self.source.channel = Some(channel);
        }
    }

    /// Reject settings the pipeline cannot run with; warn on settings
    /// outside the recommended ranges.
    pub fn validate(&self) -> AppResult<()> {
        if self.writer.batch_size == 0 {
            return Err(AppError::Config("writer.batch_size must be > 0".to_string()));
        }
        if self.writer.flush_interval_secs == 0 {
            return Err(AppError::Config(
                "writer.flush_interval_secs must be > 0".to_string(),
            ));
        }
        if self.dashboard.max_subscribers == 0 {
            return Err(AppError::Config(
                "dashboard.max_subscribers must be > 0".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Postgres
            && self.storage.database_url.trim().is_empty()
        {
            return Err(AppError::Config(
                "storage.database_url (or DATABASE_URL) is required for the postgres backend"
                    .to_string(),
            ));
        }
        if self.source.url.trim().is_empty() {
            return Err(AppError::Config("source.url must not be empty".to_string()));
        }

        let (min_secs, max_secs) = FLUSH_INTERVAL_POLICY;
        if !(min_secs..=max_secs).contains(&self.writer.flush_interval_secs) {
            warn!(
                flush_interval_secs = self.writer.flush_interval_secs,
                min_secs, max_secs, "Flush interval outside recommended range"
            );
        }
        let (min_batch, max_batch) = BATCH_SIZE_POLICY;
        if !(min_batch..=max_batch).contains(&self.writer.batch_size) {
            warn!(
                batch_size = self.writer.batch_size,
                min_batch, max_batch, "Batch size outside recommended range"
            );
        }
        Ok(())
    }
}
