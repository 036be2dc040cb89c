//! Shared handler state.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use sigrelay_persistence::{Buffer, Store};

use crate::broadcast::Broadcaster;
use crate::config::DashboardConfig;
use crate::types::BackfillOutcome;

pub type BackfillError = Box<dyn Error + Send + Sync>;

/// Bulk import of past messages, triggered by `GET /fetch-past`.
#[async_trait]
pub trait Backfill: Send + Sync {
    async fn fetch_past(&self) -> Result<BackfillOutcome, BackfillError>;
}

/// State cloned into every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) buffer: Arc<Buffer>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) backfill: Option<Arc<dyn Backfill>>,
    pub(crate) config: Arc<DashboardConfig>,
}

impl AppState {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        buffer: Arc<Buffer>,
        store: Arc<dyn Store>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            broadcaster,
            buffer,
            store,
            backfill: None,
            config: Arc::new(config),
        }
    }

    pub fn with_backfill(mut self, backfill: Arc<dyn Backfill>) -> Self {
        self.backfill = Some(backfill);
        self
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}
