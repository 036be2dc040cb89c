//! Batch writer draining the buffer into the store.

use crate::buffer::{Buffer, Pending};
use crate::error::{PersistenceError, PersistenceResult};
use crate::spool::FailedBatchSpool;
use crate::store::{Store, NOTE_TABLE, SIGNAL_TABLE};
use serde::{Deserialize, Serialize};
use sigrelay_core::{ClassifiedMessage, MarketNote, Signal};
use sigrelay_telemetry::Metrics;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Records named in a failure log line.
const SAMPLE_KEYS: usize = 3;

/// Writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Seconds between interval-triggered flushes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// List length that triggers an immediate flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on the flush performed at shutdown.
    #[serde(default = "default_final_flush_timeout_ms")]
    pub final_flush_timeout_ms: u64,

    #[serde(default)]
    pub spool: SpoolConfig,
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> usize {
    50
}

fn default_final_flush_timeout_ms() -> u64 {
    10_000
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            batch_size: default_batch_size(),
            final_flush_timeout_ms: default_final_flush_timeout_ms(),
            spool: SpoolConfig::default(),
        }
    }
}

/// Failed-batch spool settings. Off by default: failed batches are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_spool_dir")]
    pub dir: PathBuf,
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./data/spool")
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_spool_dir(),
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Store unreachable; nothing was drained.
    pub skipped: bool,
    pub signals_drained: usize,
    pub notes_drained: usize,
    pub signals_inserted: u64,
    pub notes_inserted: u64,
    pub signals_dropped: usize,
    pub notes_dropped: usize,
    /// Records inserted while replaying the spool.
    pub replayed: u64,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        !self.skipped && self.signals_drained == 0 && self.notes_drained == 0 && self.replayed == 0
    }

    pub fn had_failures(&self) -> bool {
        self.signals_dropped > 0 || self.notes_dropped > 0
    }
}

/// Drains a [`Buffer`] into a [`Store`].
///
/// Flushes are serialized, so records reach the store in append order
/// within each list. Signals and notes are written in separate
/// transactions; a failure in one does not affect the other. A failed
/// batch is logged and dropped (or spooled when enabled), never retried
/// within the same cycle.
pub struct BatchWriter {
    store: Arc<dyn Store>,
    buffer: Arc<Buffer>,
    config: WriterConfig,
    /// Held for the duration of a flush.
    spool: Mutex<Option<FailedBatchSpool>>,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn Store>,
        buffer: Arc<Buffer>,
        config: WriterConfig,
    ) -> PersistenceResult<Self> {
        let spool = if config.spool.enabled {
            Some(FailedBatchSpool::new(&config.spool.dir)?)
        } else {
            None
        };

        Ok(Self {
            store,
            buffer,
            config,
            spool: Mutex::new(spool),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Flush once.
    ///
    /// No-op when nothing is buffered or spooled. When the store fails its
    /// health check the cycle is skipped and records stay buffered.
    pub async fn flush(&self) -> FlushReport {
        let mut spool = self.spool.lock().await;
        let spool_pending = spool.as_ref().is_some_and(|s| s.has_pending());

        let mut report = FlushReport::default();
        if self.buffer.is_empty() && !spool_pending {
            return report;
        }

        if let Err(e) = self.store.health_check().await {
            let (signals, notes) = self.buffer.counts();
            warn!(
                backend = self.store.backend_type(),
                error = %e,
                pending_signals = signals,
                pending_notes = notes,
                "Store health check failed, flush skipped"
            );
            report.skipped = true;
            return report;
        }

        let started = Instant::now();
        let Pending { signals, notes } = self.buffer.drain();
        report.signals_drained = signals.len();
        report.notes_drained = notes.len();
        Metrics::buffer_pending(0, 0);

        let mut done = TablesDone::default();
        self.write_batch(&signals, &notes, &mut spool, &mut report, &mut done)
            .await;

        if !report.had_failures() && spool_pending {
            if let Some(spool) = spool.as_mut() {
                report.replayed = self.replay(spool).await;
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Metrics::flush_duration(elapsed_ms);
        debug!(?report, elapsed_ms, "Flush complete");
        report
    }

    /// Insert one drained batch, each table in its own transaction.
    ///
    /// A failed table is recorded as dropped. `done` marks the tables that
    /// finished, so a caller that cancels this future knows which records
    /// were never written.
    async fn write_batch(
        &self,
        signals: &[Signal],
        notes: &[MarketNote],
        spool: &mut Option<FailedBatchSpool>,
        report: &mut FlushReport,
        done: &mut TablesDone,
    ) {
        if !signals.is_empty() {
            match self.store.insert_signals(signals).await {
                Ok(inserted) => {
                    report.signals_inserted = inserted;
                    Metrics::flush_ok(SIGNAL_TABLE, inserted);
                }
                Err(e) => {
                    report.signals_dropped = signals.len();
                    drop_signals(signals, &e, spool);
                }
            }
        }
        done.signals = true;

        if !notes.is_empty() {
            match self.store.insert_notes(notes).await {
                Ok(inserted) => {
                    report.notes_inserted = inserted;
                    Metrics::flush_ok(NOTE_TABLE, inserted);
                }
                Err(e) => {
                    report.notes_dropped = notes.len();
                    drop_notes(notes, &e, spool);
                }
            }
        }
        done.notes = true;
    }

    /// Write spooled records back; clear the spool if both tables accept them.
    async fn replay(&self, spool: &mut FailedBatchSpool) -> u64 {
        let records = match spool.load() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to read spool, replay postponed");
                return 0;
            }
        };

        let mut signals = Vec::new();
        let mut notes = Vec::new();
        for record in records {
            match record {
                ClassifiedMessage::Signal(s) => signals.push(s),
                ClassifiedMessage::Market(n) => notes.push(n),
            }
        }

        let mut replayed = 0;
        let mut ok = true;
        if !signals.is_empty() {
            match self.store.insert_signals(&signals).await {
                Ok(n) => replayed += n,
                Err(e) => {
                    ok = false;
                    warn!(table = SIGNAL_TABLE, error = %e, "Spool replay failed");
                }
            }
        }
        if !notes.is_empty() {
            match self.store.insert_notes(&notes).await {
                Ok(n) => replayed += n,
                Err(e) => {
                    ok = false;
                    warn!(table = NOTE_TABLE, error = %e, "Spool replay failed");
                }
            }
        }

        if ok {
            if let Err(e) = spool.clear() {
                warn!(error = %e, "Failed to clear spool after replay");
            }
            info!(
                signals = signals.len(),
                notes = notes.len(),
                inserted = replayed,
                "Spool replayed"
            );
        }
        replayed
    }

    /// Flush on the configured interval and whenever the buffer reaches the
    /// batch size, until `shutdown` fires. Then performs one final flush
    /// bounded by `final_flush_timeout_ms`.
    pub async fn run(&self, shutdown: CancellationToken) -> PersistenceResult<FlushReport> {
        let period = Duration::from_secs(self.config.flush_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs(),
            batch_size = self.buffer.batch_size(),
            backend = self.store.backend_type(),
            "Batch writer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.buffer.threshold_reached() => {
                    debug!("Batch size reached");
                    self.flush().await;
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        self.final_flush().await
    }

    /// One unconditional flush bounded by `final_flush_timeout_ms`.
    ///
    /// Unlike [`flush`](Self::flush), a failed health check does not skip
    /// the cycle: the inserts are attempted anyway. Records that are not
    /// written, because a table failed or the deadline passed, are logged,
    /// counted as dropped and spooled when enabled, and the call returns an
    /// error.
    pub async fn final_flush(&self) -> PersistenceResult<FlushReport> {
        let timeout_ms = self.config.final_flush_timeout_ms;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let timed_out = PersistenceError::Timeout(timeout_ms);

        let mut spool = match tokio::time::timeout_at(deadline, self.spool.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                // An in-flight flush still holds the spool; nothing can be spooled.
                let Pending { signals, notes } = self.buffer.drain();
                let mut none = None;
                drop_signals(&signals, &timed_out, &mut none);
                drop_notes(&notes, &timed_out, &mut none);
                error!(
                    timeout_ms,
                    signals_dropped = signals.len(),
                    notes_dropped = notes.len(),
                    "Final flush timed out waiting for the running flush"
                );
                return Err(timed_out);
            }
        };
        let spool_pending = spool.as_ref().is_some_and(|s| s.has_pending());

        let Pending { signals, notes } = self.buffer.drain();
        Metrics::buffer_pending(0, 0);
        let mut report = FlushReport {
            signals_drained: signals.len(),
            notes_drained: notes.len(),
            ..FlushReport::default()
        };
        if signals.is_empty() && notes.is_empty() && !spool_pending {
            info!("Final flush: nothing pending");
            return Ok(report);
        }

        match tokio::time::timeout_at(deadline, self.store.health_check()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                error = %e,
                "Store health check failed before final flush, writing anyway"
            ),
            Err(_) => warn!("Store health check timed out before final flush, writing anyway"),
        }

        let mut done = TablesDone::default();
        let written = tokio::time::timeout_at(
            deadline,
            self.write_batch(&signals, &notes, &mut spool, &mut report, &mut done),
        )
        .await;

        if written.is_err() {
            if !done.signals && !signals.is_empty() {
                report.signals_dropped = signals.len();
                drop_signals(&signals, &timed_out, &mut spool);
            }
            if !done.notes && !notes.is_empty() {
                report.notes_dropped = notes.len();
                drop_notes(&notes, &timed_out, &mut spool);
            }
            error!(timeout_ms, ?report, "Final flush timed out");
            return Err(timed_out);
        }

        if report.had_failures() {
            error!(?report, "Final flush dropped records");
            return Err(PersistenceError::BatchDropped {
                signals: report.signals_dropped,
                notes: report.notes_dropped,
            });
        }

        if spool_pending {
            if let Some(spool) = spool.as_mut() {
                match tokio::time::timeout_at(deadline, self.replay(spool)).await {
                    Ok(replayed) => report.replayed = replayed,
                    Err(_) => warn!("Spool replay cut off by final flush deadline, spool kept"),
                }
            }
        }

        info!(?report, "Final flush complete");
        Ok(report)
    }
}

/// Tables a batch write got through.
#[derive(Debug, Default)]
struct TablesDone {
    signals: bool,
    notes: bool,
}

fn drop_signals(signals: &[Signal], err: &PersistenceError, spool: &mut Option<FailedBatchSpool>) {
    if signals.is_empty() {
        return;
    }
    log_failure(SIGNAL_TABLE, signals.iter().map(Signal::dedup_key), err);
    Metrics::flush_failed(SIGNAL_TABLE, signals.len() as u64);
    spool_records(
        spool.as_mut(),
        signals.iter().cloned().map(ClassifiedMessage::Signal),
    );
}

fn drop_notes(notes: &[MarketNote], err: &PersistenceError, spool: &mut Option<FailedBatchSpool>) {
    if notes.is_empty() {
        return;
    }
    log_failure(NOTE_TABLE, notes.iter().map(MarketNote::dedup_key), err);
    Metrics::flush_failed(NOTE_TABLE, notes.len() as u64);
    spool_records(
        spool.as_mut(),
        notes.iter().cloned().map(ClassifiedMessage::Market),
    );
}

fn log_failure<'a>(table: &str, keys: impl Iterator<Item = &'a str>, err: &PersistenceError) {
    let keys: Vec<&str> = keys.collect();
    let sample: Vec<String> = keys.iter().take(SAMPLE_KEYS).map(|k| preview(k)).collect();
    error!(
        table,
        count = keys.len(),
        ?sample,
        error = %err,
        "Batch insert failed, batch dropped"
    );
}

fn spool_records(
    spool: Option<&mut FailedBatchSpool>,
    records: impl Iterator<Item = ClassifiedMessage>,
) {
    let Some(spool) = spool else {
        return;
    };
    let records: Vec<ClassifiedMessage> = records.collect();
    match spool.append(&records) {
        Ok(n) => info!(records = n, "Dropped batch spooled for replay"),
        Err(e) => error!(error = %e, records = records.len(), "Failed to spool dropped batch"),
    }
}

/// First line of a key, shortened for logs.
fn preview(key: &str) -> String {
    let first_line = key.lines().next().unwrap_or_default();
    first_line.chars().take(60).collect()
}
