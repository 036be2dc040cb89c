//! Message pipeline.
//!
//! Wires each [`RawMessage`] through classification into the [`Buffer`] and
//! out to live subscribers, and owns the [`BatchWriter`] task that drains
//! the buffer into storage.
//!
//! ```text
//! IDLE -> STARTING -> RUNNING -> DRAINING -> STOPPED
//! ```
//!
//! STARTING opens the store and ensures the schema; a failure there moves
//! straight to STOPPED. DRAINING stops intake, runs the final flush, closes
//! every subscriber and releases the store.

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::storage::open_store;
use sigrelay_core::{ClassifiedMessage, MessageKind, RawMessage};
use sigrelay_dashboard::{Broadcaster, CLOSE_GOING_AWAY};
use sigrelay_parser::classify_message;
use sigrelay_persistence::{
    BatchWriter, Buffer, FlushReport, PersistenceResult, Store, WriterConfig,
};
use sigrelay_telemetry::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close reason sent to subscribers at shutdown.
const SHUTDOWN_REASON: &str = "Server shutting down";

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Draining => "DRAINING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub processed: u64,
    pub signals: u64,
    pub notes: u64,
    pub ignored: u64,
    /// Events delivered to at least one subscriber.
    pub broadcasts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    signals: AtomicU64,
    notes: AtomicU64,
    ignored: AtomicU64,
    broadcasts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            notes: self.notes.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    state: PipelineState,
    buffer: Arc<Buffer>,
    broadcaster: Arc<Broadcaster>,
    writer_config: WriterConfig,
    store: Option<Arc<dyn Store>>,
    writer: Option<Arc<BatchWriter>>,
    writer_shutdown: CancellationToken,
    writer_task: Option<JoinHandle<PersistenceResult<FlushReport>>>,
    stats_interval: Option<Duration>,
    counters: Counters,
}

impl Pipeline {
    pub fn new(writer_config: WriterConfig, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            state: PipelineState::Idle,
            buffer: Arc::new(Buffer::new(writer_config.batch_size)),
            broadcaster,
            writer_config,
            store: None,
            writer: None,
            writer_shutdown: CancellationToken::new(),
            writer_task: None,
            stats_interval: None,
            counters: Counters::default(),
        }
    }

    /// Log a stats line every `secs` seconds while running. 0 disables it.
    pub fn with_stats_interval(mut self, secs: u64) -> Self {
        self.stats_interval = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn buffer(&self) -> Arc<Buffer> {
        self.buffer.clone()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// The open store; `None` outside RUNNING.
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    /// The batch writer; `None` outside RUNNING.
    pub fn writer(&self) -> Option<Arc<BatchWriter>> {
        self.writer.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    fn expect_state(&self, expected: PipelineState) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AppError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Open the configured store and start.
    pub async fn start(&mut self, storage: &StorageConfig) -> AppResult<()> {
        self.expect_state(PipelineState::Idle)?;
        self.state = PipelineState::Starting;
        info!(state = %self.state, "Pipeline starting");

        match open_store(storage) {
            Ok(store) => self.start_with_store(store).await,
            Err(e) => {
                error!(error = %e, "Failed to open store");
                self.state = PipelineState::Stopped;
                Err(e)
            }
        }
    }

    /// Start against an already-open store: ensure the schema and spawn
    /// the batch writer.
    pub async fn start_with_store(&mut self, store: Arc<dyn Store>) -> AppResult<()> {
        if !matches!(self.state, PipelineState::Idle | PipelineState::Starting) {
            return Err(AppError::InvalidState {
                expected: PipelineState::Idle,
                actual: self.state,
            });
        }
        self.state = PipelineState::Starting;

        if let Err(e) = self.spawn_writer(store.clone()).await {
            error!(error = %e, backend = store.backend_type(), "Pipeline failed to start");
            store.close().await;
            self.state = PipelineState::Stopped;
            return Err(e);
        }

        self.state = PipelineState::Running;
        info!(
            backend = store.backend_type(),
            batch_size = self.writer_config.batch_size,
            flush_interval_secs = self.writer_config.flush_interval_secs,
            "Pipeline running"
        );
        Ok(())
    }

    async fn spawn_writer(&mut self, store: Arc<dyn Store>) -> AppResult<()> {
        store.ensure_schema().await?;

        let writer = Arc::new(BatchWriter::new(
            store.clone(),
            self.buffer.clone(),
            self.writer_config.clone(),
        )?);

        let task_writer = writer.clone();
        let shutdown = self.writer_shutdown.clone();
        self.writer_task = Some(tokio::spawn(async move { task_writer.run(shutdown).await }));
        self.writer = Some(writer);
        self.store = Some(store);
        Ok(())
    }

    /// Classify one message, buffer it and broadcast it.
    ///
    /// Returns the kind the message was classified as, or `None` when it
    /// was ignored (blank text, or intake stopped).
    pub async fn process(&self, raw: RawMessage) -> Option<MessageKind> {
        if self.state != PipelineState::Running {
            debug!(state = %self.state, "Intake stopped, message discarded");
            return None;
        }
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        let Some(classified) = classify_message(&raw) else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            Metrics::message("ignored");
            return None;
        };

        let kind = classified.kind();
        match &classified {
            ClassifiedMessage::Signal(signal) => {
                self.counters.signals.fetch_add(1, Ordering::Relaxed);
                info!(
                    pair = %signal.pair,
                    setup_type = %signal.setup_type,
                    entry = ?signal.entry,
                    "Signal received"
                );
            }
            ClassifiedMessage::Market(note) => {
                self.counters.notes.fetch_add(1, Ordering::Relaxed);
                debug!(sender = %note.sender, "Market note received");
            }
        }
        Metrics::message(kind.as_str());

        self.buffer.append(classified.clone());
        let (signals, notes) = self.buffer.counts();
        Metrics::buffer_pending(signals, notes);

        let report = self.broadcaster.publish(&classified).await;
        if report.delivered > 0 {
            self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        }

        Some(kind)
    }

    /// Consume `messages` until `shutdown` fires or the sender side closes.
    pub async fn run(
        &self,
        messages: &mut mpsc::Receiver<RawMessage>,
        shutdown: CancellationToken,
    ) -> AppResult<()> {
        self.expect_state(PipelineState::Running)?;

        let mut stats_ticker = self.stats_interval.map(|period| {
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping intake");
                    break;
                }
                msg = messages.recv() => match msg {
                    Some(raw) => {
                        self.process(raw).await;
                    }
                    None => {
                        warn!("Message source closed");
                        break;
                    }
                },
                _ = next_tick(&mut stats_ticker) => self.log_stats(),
            }
        }
        Ok(())
    }

    /// Stop intake, flush, close subscribers, release the store.
    ///
    /// Returns the final flush report. The pipeline reaches STOPPED even
    /// when the final flush fails or times out.
    pub async fn drain(&mut self) -> AppResult<FlushReport> {
        match self.state {
            PipelineState::Running => {}
            PipelineState::Idle => {
                self.state = PipelineState::Stopped;
                return Ok(FlushReport::default());
            }
            actual => {
                return Err(AppError::InvalidState {
                    expected: PipelineState::Running,
                    actual,
                })
            }
        }

        self.state = PipelineState::Draining;
        let (signals, notes) = self.buffer.counts();
        info!(
            pending_signals = signals,
            pending_notes = notes,
            "Pipeline draining"
        );

        self.writer_shutdown.cancel();
        let flushed = match self.writer_task.take() {
            Some(task) => task
                .await
                .map_err(AppError::from)
                .and_then(|r| r.map_err(AppError::from)),
            None => Ok(FlushReport::default()),
        };
        if let Err(e) = &flushed {
            error!(error = %e, "Final flush failed");
        }

        self.broadcaster
            .close_all(CLOSE_GOING_AWAY, SHUTDOWN_REASON)
            .await;

        self.writer = None;
        if let Some(store) = self.store.take() {
            store.close().await;
        }

        self.state = PipelineState::Stopped;
        self.log_stats();
        info!("Pipeline stopped");
        flushed
    }

    fn log_stats(&self) {
        let stats = self.stats();
        let (pending_signals, pending_notes) = self.buffer.counts();
        info!(
            processed = stats.processed,
            signals = stats.signals,
            notes = stats.notes,
            ignored = stats.ignored,
            broadcasts = stats.broadcasts,
            subscribers = self.broadcaster.len(),
            pending_signals,
            pending_notes,
            "Pipeline stats"
        );
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
