//! End-to-end pipeline scenarios against the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use sigrelay_app::{AppError, Pipeline, PipelineState};
use sigrelay_core::{ClassifiedMessage, MarketNote, MessageKind, RawMessage, SetupType, Signal};
use sigrelay_dashboard::{BroadcastResult, Broadcaster, Subscriber, CLOSE_GOING_AWAY};
use sigrelay_persistence::{
    PersistenceError, PersistenceResult, SqliteStore, Store, WriterConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SCENARIO_A: &str =
    "#BTCUSDT LONG\nEntry: 50000\nTarget 1: 52000\nStop Loss: 48000 ☠️\nProfit incoming, Loss avoided";

#[derive(Default)]
struct RecordingSubscriber {
    frames: Mutex<Vec<String>>,
    closed_with: Mutex<Option<u16>>,
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn send(&self, text: &str) -> BroadcastResult<()> {
        self.frames.lock().push(text.to_string());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.closed_with.lock().is_none()
    }

    async fn close(&self, code: u16, _reason: &str) {
        *self.closed_with.lock() = Some(code);
    }
}

/// A store whose schema setup always fails.
struct UnreachableStore;

#[async_trait]
impl Store for UnreachableStore {
    fn backend_type(&self) -> &'static str {
        "unreachable"
    }

    async fn ensure_schema(&self) -> PersistenceResult<()> {
        Err(PersistenceError::Unavailable("connection refused".to_string()))
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        Err(PersistenceError::Unavailable("connection refused".to_string()))
    }

    async fn insert_signals(&self, _signals: &[Signal]) -> PersistenceResult<u64> {
        Ok(0)
    }

    async fn insert_notes(&self, _notes: &[MarketNote]) -> PersistenceResult<u64> {
        Ok(0)
    }

    async fn recent_messages(&self, _limit: usize) -> PersistenceResult<Vec<ClassifiedMessage>> {
        Ok(Vec::new())
    }

    async fn close(&self) {}
}

/// A store that accepts the schema but rejects every insert.
struct RejectingStore;

#[async_trait]
impl Store for RejectingStore {
    fn backend_type(&self) -> &'static str {
        "rejecting"
    }

    async fn ensure_schema(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        Err(PersistenceError::Unavailable("connection lost".to_string()))
    }

    async fn insert_signals(&self, _signals: &[Signal]) -> PersistenceResult<u64> {
        Err(PersistenceError::Unavailable("connection lost".to_string()))
    }

    async fn insert_notes(&self, _notes: &[MarketNote]) -> PersistenceResult<u64> {
        Err(PersistenceError::Unavailable("connection lost".to_string()))
    }

    async fn recent_messages(&self, _limit: usize) -> PersistenceResult<Vec<ClassifiedMessage>> {
        Ok(Vec::new())
    }

    async fn close(&self) {}
}

fn writer_config(batch_size: usize, flush_interval_secs: u64) -> WriterConfig {
    WriterConfig {
        batch_size,
        flush_interval_secs,
        ..WriterConfig::default()
    }
}

async fn running_pipeline(config: WriterConfig) -> (Pipeline, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let mut pipeline = Pipeline::new(config, Arc::new(Broadcaster::new(10)));
    pipeline.start_with_store(store.clone()).await.unwrap();
    (pipeline, store)
}

async fn wait_for_rows(store: &SqliteStore, expected: (u64, u64)) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.row_counts().unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rows not flushed in time");
}

#[tokio::test]
async fn scenario_a_signal_is_parsed_and_stored() {
    let (mut pipeline, store) = running_pipeline(writer_config(50, 3600)).await;
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let kind = pipeline.process(RawMessage::new(SCENARIO_A, ts)).await;
    assert_eq!(kind, Some(MessageKind::Signal));

    pipeline.drain().await.unwrap();
    assert_eq!(store.row_counts().unwrap(), (1, 0));

    let stored = store.recent_messages(10).await.unwrap();
    let [ClassifiedMessage::Signal(signal)] = stored.as_slice() else {
        panic!("expected one stored signal, got {stored:?}");
    };
    assert_eq!(signal.pair, "BTCUSDT");
    assert_eq!(signal.setup_type, SetupType::Long);
    assert_eq!(signal.entry.unwrap().to_string(), "50000.00000000");
    assert_eq!(signal.tp1, Some(dec!(52000)));
    assert_eq!(signal.stop_loss, Some(dec!(48000)));
    assert_eq!(signal.timestamp, ts);
    assert_eq!(signal.full_message, SCENARIO_A);
}

#[tokio::test]
async fn scenario_b_market_note_sender() {
    let (mut pipeline, store) = running_pipeline(writer_config(50, 3600)).await;
    let now = Utc::now();

    pipeline
        .process(RawMessage::new("Market is looking bullish today", now))
        .await;
    pipeline
        .process(RawMessage::new("Funding flipped negative", now).with_sender("Desk"))
        .await;
    pipeline.drain().await.unwrap();

    let mut senders: Vec<(String, String)> = store
        .recent_messages(10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| match m {
            ClassifiedMessage::Market(note) => (note.text, note.sender),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    senders.sort();
    assert_eq!(
        senders,
        vec![
            ("Funding flipped negative".to_string(), "Desk".to_string()),
            ("Market is looking bullish today".to_string(), "Unknown".to_string()),
        ]
    );
}

#[tokio::test]
async fn scenario_c_duplicates_collapse_on_flush() {
    let (mut pipeline, store) = running_pipeline(writer_config(50, 3600)).await;
    let now = Utc::now();

    pipeline.process(RawMessage::new(SCENARIO_A, now)).await;
    pipeline.process(RawMessage::new(SCENARIO_A, now)).await;
    assert_eq!(pipeline.buffer().counts(), (2, 0));

    let report = pipeline.drain().await.unwrap();
    assert_eq!(report.signals_drained, 2);
    assert_eq!(report.signals_inserted, 1);
    assert_eq!(store.row_counts().unwrap(), (1, 0));
}

#[tokio::test]
async fn scenario_d_batch_size_triggers_flush_before_interval() {
    let (mut pipeline, store) = running_pipeline(writer_config(2, 3600)).await;
    let now = Utc::now();

    pipeline
        .process(RawMessage::new("#ETHUSDT SHORT\nEntry: 3000\nprofit\nloss", now))
        .await;
    pipeline
        .process(RawMessage::new("#SOLUSDT LONG\nEntry: 150\nprofit\nloss", now))
        .await;

    wait_for_rows(&store, (2, 0)).await;
    assert!(pipeline.buffer().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Running);

    pipeline.drain().await.unwrap();
}

#[tokio::test]
async fn broadcast_is_independent_of_persistence() {
    let (mut pipeline, _store) = running_pipeline(writer_config(50, 3600)).await;
    let subscriber = Arc::new(RecordingSubscriber::default());
    pipeline
        .broadcaster()
        .register(subscriber.clone())
        .await
        .unwrap();

    pipeline
        .process(RawMessage::new("Market is looking bullish today", Utc::now()))
        .await;

    {
        let frames = subscriber.frames.lock();
        assert_eq!(frames.len(), 1);
        let event: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(event["type"], "market");
        assert_eq!(event["sender"], "Unknown");
    }
    assert_eq!(pipeline.buffer().counts(), (0, 1));
    assert_eq!(pipeline.stats().broadcasts, 1);

    pipeline.drain().await.unwrap();
    assert_eq!(*subscriber.closed_with.lock(), Some(CLOSE_GOING_AWAY));
    assert!(pipeline.broadcaster().is_empty());
}

#[tokio::test]
async fn run_consumes_channel_and_flushes_on_shutdown() {
    let (mut pipeline, store) = running_pipeline(writer_config(50, 3600)).await;
    let (tx, mut rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();

    let now = Utc::now();
    tx.send(RawMessage::new(SCENARIO_A, now)).await.unwrap();
    tx.send(RawMessage::new("note one", now)).await.unwrap();
    tx.send(RawMessage::new("", now)).await.unwrap();
    drop(tx);

    pipeline.run(&mut rx, shutdown).await.unwrap();
    assert_eq!(pipeline.stats().processed, 3);
    assert_eq!(pipeline.stats().ignored, 1);
    assert_eq!(store.row_counts().unwrap(), (0, 0));

    let report = pipeline.drain().await.unwrap();
    assert_eq!(report.signals_inserted, 1);
    assert_eq!(report.notes_inserted, 1);
    assert_eq!(store.row_counts().unwrap(), (1, 1));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn messages_after_drain_are_discarded() {
    let (mut pipeline, _store) = running_pipeline(writer_config(50, 3600)).await;
    pipeline.drain().await.unwrap();

    let kind = pipeline
        .process(RawMessage::new("late note", Utc::now()))
        .await;
    assert!(kind.is_none());
    assert!(pipeline.buffer().is_empty());
}

#[tokio::test]
async fn startup_failure_never_reaches_running() {
    let mut pipeline = Pipeline::new(WriterConfig::default(), Arc::new(Broadcaster::new(10)));
    let result = pipeline.start_with_store(Arc::new(UnreachableStore)).await;

    assert!(matches!(result, Err(AppError::Persistence(_))));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline
        .process(RawMessage::new("note", Utc::now()))
        .await
        .is_none());
}

#[tokio::test]
async fn drain_reports_records_lost_at_shutdown() {
    let mut pipeline = Pipeline::new(writer_config(50, 3600), Arc::new(Broadcaster::new(10)));
    pipeline
        .start_with_store(Arc::new(RejectingStore))
        .await
        .unwrap();

    pipeline
        .process(RawMessage::new("note before outage", Utc::now()))
        .await;
    let result = pipeline.drain().await;

    assert!(matches!(
        result,
        Err(AppError::Persistence(PersistenceError::BatchDropped {
            signals: 0,
            notes: 1
        }))
    ));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.buffer().is_empty());
}
