//! Storage backend abstraction.

use crate::error::PersistenceResult;
use async_trait::async_trait;
use sigrelay_core::{ClassifiedMessage, MarketNote, Signal};

/// Table holding signals, unique on `full_message`.
pub const SIGNAL_TABLE: &str = "signal_messages";
/// Table holding market notes, unique on `text`.
pub const NOTE_TABLE: &str = "market_messages";

/// A relational store for classified records.
///
/// Inserts ignore rows whose natural key already exists and return the
/// number of rows actually written. Each call is one transaction: either
/// every new row in the batch is committed or none is.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;

    /// Create tables and indexes if missing. Idempotent.
    async fn ensure_schema(&self) -> PersistenceResult<()>;

    /// Cheap round trip proving the store is reachable.
    async fn health_check(&self) -> PersistenceResult<()>;

    async fn insert_signals(&self, signals: &[Signal]) -> PersistenceResult<u64>;

    async fn insert_notes(&self, notes: &[MarketNote]) -> PersistenceResult<u64>;

    /// Most recent records from both tables, newest first.
    async fn recent_messages(&self, limit: usize) -> PersistenceResult<Vec<ClassifiedMessage>>;

    /// Release connections.
    async fn close(&self);
}

/// Merge two newest-first lists into one, keeping at most `limit` entries.
pub(crate) fn merge_newest_first(
    signals: Vec<Signal>,
    notes: Vec<MarketNote>,
    limit: usize,
) -> Vec<ClassifiedMessage> {
    let mut merged: Vec<ClassifiedMessage> = signals
        .into_iter()
        .map(ClassifiedMessage::Signal)
        .chain(notes.into_iter().map(ClassifiedMessage::Market))
        .collect();
    merged.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sigrelay_core::SetupType;

    #[test]
    fn test_merge_orders_across_tables() {
        let now = Utc::now();
        let signal = Signal {
            pair: "BTC".to_string(),
            setup_type: SetupType::Long,
            entry: None,
            leverage: None,
            tp1: None,
            tp2: None,
            tp3: None,
            tp4: None,
            stop_loss: None,
            timestamp: now - Duration::seconds(5),
            full_message: "sig".to_string(),
        };
        let newer = MarketNote::new(None, "newer", now);
        let older = MarketNote::new(None, "older", now - Duration::seconds(10));

        let merged = merge_newest_first(vec![signal], vec![newer, older], 2);
        let keys: Vec<_> = merged.iter().map(|m| m.dedup_key()).collect();
        assert_eq!(keys, vec!["newer", "sig"]);
    }
}
