//! Main application orchestration.
//!
//! Coordinates all components:
//! - Relay source connection
//! - Pipeline (classification, buffering, batch writer)
//! - Subscriber server and control routes

use crate::backfill::ArchiveBackfill;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::Pipeline;
use sigrelay_core::RawMessage;
use sigrelay_dashboard::{bind, serve, AppState, Broadcaster};
use sigrelay_feed::{JsonlArchive, RelaySource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capacity of the source → pipeline channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 1000;

/// Time allowed for background tasks to exit after shutdown.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the application when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C, the shutdown token, or the source giving up.
    pub async fn run(self) -> AppResult<()> {
        let config = self.config;
        let shutdown = self.shutdown;

        let broadcaster = Arc::new(Broadcaster::new(config.dashboard.max_subscribers));
        let mut pipeline = Pipeline::new(config.writer.clone(), broadcaster.clone())
            .with_stats_interval(config.telemetry.stats_interval_secs);

        pipeline.start(&config.storage).await?;

        let (message_tx, mut message_rx) = mpsc::channel::<RawMessage>(MESSAGE_CHANNEL_CAPACITY);
        let source = Arc::new(RelaySource::new(config.source.clone(), message_tx));

        let stream = match source.open().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, url = %config.source.url, "Failed to connect to message source");
                pipeline.drain().await?;
                return Err(e.into());
            }
        };

        let listener = match bind(&config.dashboard).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, addr = %config.dashboard.bind_addr(), "Failed to bind subscriber server");
                source.shutdown();
                pipeline.drain().await?;
                return Err(e.into());
            }
        };

        let mut state = AppState::new(
            broadcaster.clone(),
            pipeline.buffer(),
            pipeline
                .store()
                .ok_or_else(|| AppError::Config("store not open".to_string()))?,
            config.dashboard.clone(),
        );
        if let (Some(path), Some(writer)) = (&config.backfill.archive_path, pipeline.writer()) {
            let archive = JsonlArchive::new(path).with_channel(config.source.channel.clone());
            state = state.with_backfill(Arc::new(ArchiveBackfill::new(
                archive,
                config.backfill.limit,
                pipeline.buffer(),
                writer,
            )));
            info!(path = %path.display(), limit = config.backfill.limit, "Backfill enabled");
        }

        let server_shutdown = CancellationToken::new();
        let server_handle = tokio::spawn(serve(listener, state, server_shutdown.clone()));

        let source_task = source.clone();
        let source_shutdown = shutdown.clone();
        let source_handle = tokio::spawn(async move {
            if let Err(e) = source_task.run(stream).await {
                error!(error = %e, "Message source stopped");
                source_shutdown.cancel();
            }
        });

        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown signal received");
            signal_shutdown.cancel();
        });

        info!(
            source = %config.source.url,
            dashboard = %config.dashboard.bind_addr(),
            "Entering main event loop"
        );
        pipeline.run(&mut message_rx, shutdown.clone()).await?;

        source.shutdown();
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, source_handle)
            .await
            .is_err()
        {
            warn!("Message source did not stop in time");
        }

        let drained = pipeline.drain().await;

        server_shutdown.cancel();
        match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, server_handle).await {
            Ok(Ok(Err(e))) => error!(error = %e, "Subscriber server error"),
            Ok(Err(e)) => error!(error = %e, "Subscriber server task failed"),
            Err(_) => warn!("Subscriber server did not stop in time"),
            Ok(Ok(Ok(()))) => {}
        }

        let report = drained?;
        info!(
            source_forwarded = source.forwarded(),
            source_skipped = source.skipped(),
            ?report,
            "Shutdown complete"
        );
        Ok(())
    }
}
