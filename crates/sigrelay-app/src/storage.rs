//! Store selection.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AppError, AppResult};
use sigrelay_persistence::{PgStore, PgStoreConfig, SqliteStore, Store};
use std::sync::Arc;
use tracing::info;

/// Open the configured backend. Does not touch the schema.
pub fn open_store(config: &StorageConfig) -> AppResult<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.backend {
        StorageBackend::Postgres => {
            if config.database_url.trim().is_empty() {
                return Err(AppError::Config("database url is empty".to_string()));
            }
            Arc::new(PgStore::connect(&PgStoreConfig {
                url: config.database_url.clone(),
                pool_max_size: config.pool_max_size,
                connect_timeout_ms: config.connect_timeout_ms,
            })?)
        }
        StorageBackend::Sqlite => Arc::new(SqliteStore::new(&config.sqlite_path)?),
    };
    info!(backend = store.backend_type(), "Store opened");
    Ok(store)
}
