//! SQLite store for local runs and tests.
//!
//! Same tables and conflict rules as the PostgreSQL store. Decimals are
//! stored as text at the price scale; timestamps as Unix milliseconds.

use crate::error::PersistenceResult;
use crate::store::{merge_newest_first, Store};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use sigrelay_core::{ClassifiedMessage, MarketNote, SetupType, Signal};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signal_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL,
    setup_type TEXT NOT NULL,
    entry TEXT,
    leverage INTEGER,
    tp1 TEXT,
    tp2 TEXT,
    tp3 TEXT,
    tp4 TEXT,
    stop_loss TEXT,
    timestamp INTEGER NOT NULL,
    full_message TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS signal_messages_full_message_key
    ON signal_messages (full_message);
CREATE INDEX IF NOT EXISTS idx_signal_messages_timestamp ON signal_messages (timestamp);
CREATE INDEX IF NOT EXISTS idx_signal_messages_pair ON signal_messages (pair);

CREATE TABLE IF NOT EXISTS market_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    text TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS market_messages_text_key ON market_messages (text);
CREATE INDEX IF NOT EXISTS idx_market_messages_timestamp ON market_messages (timestamp);
"#;

const INSERT_SIGNAL_SQL: &str = "INSERT INTO signal_messages \
    (pair, setup_type, entry, leverage, tp1, tp2, tp3, tp4, stop_loss, timestamp, full_message) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
    ON CONFLICT DO NOTHING";

const INSERT_NOTE_SQL: &str = "INSERT INTO market_messages (sender, text, timestamp) \
    VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING";

/// SQLite store over a single connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn new<P: AsRef<Path>>(db_path: P) -> PersistenceResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, useful for tests.
    pub fn new_in_memory() -> PersistenceResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Row counts as `(signals, notes)`.
    pub fn row_counts(&self) -> PersistenceResult<(u64, u64)> {
        let conn = self.conn.lock();
        let signals: i64 =
            conn.query_row("SELECT COUNT(*) FROM signal_messages", [], |r| r.get(0))?;
        let notes: i64 =
            conn.query_row("SELECT COUNT(*) FROM market_messages", [], |r| r.get(0))?;
        Ok((signals as u64, notes as u64))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend_type(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_schema(&self) -> PersistenceResult<()> {
        self.conn.lock().execute_batch(SCHEMA_SQL)?;
        info!("SQLite schema ensured");
        Ok(())
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    async fn insert_signals(&self, signals: &[Signal]) -> PersistenceResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_SIGNAL_SQL)?;
            for signal in signals {
                inserted += stmt.execute(params![
                    signal.pair,
                    signal.setup_type.as_str(),
                    decimal_text(signal.entry),
                    signal.leverage,
                    decimal_text(signal.tp1),
                    decimal_text(signal.tp2),
                    decimal_text(signal.tp3),
                    decimal_text(signal.tp4),
                    decimal_text(signal.stop_loss),
                    signal.timestamp.timestamp_millis(),
                    signal.full_message,
                ])? as u64;
            }
        }
        tx.commit()?;
        debug!(batch = signals.len(), inserted, "Signals committed");
        Ok(inserted)
    }

    async fn insert_notes(&self, notes: &[MarketNote]) -> PersistenceResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_NOTE_SQL)?;
            for note in notes {
                inserted += stmt.execute(params![
                    note.sender,
                    note.text,
                    note.timestamp.timestamp_millis(),
                ])? as u64;
            }
        }
        tx.commit()?;
        debug!(batch = notes.len(), inserted, "Market notes committed");
        Ok(inserted)
    }

    async fn recent_messages(&self, limit: usize) -> PersistenceResult<Vec<ClassifiedMessage>> {
        let conn = self.conn.lock();
        let limit_param = limit as i64;

        let signals = conn
            .prepare_cached(
                "SELECT pair, setup_type, entry, leverage, tp1, tp2, tp3, tp4, stop_loss, \
                 timestamp, full_message FROM signal_messages \
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?
            .query_map([limit_param], signal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let notes = conn
            .prepare_cached(
                "SELECT sender, text, timestamp FROM market_messages \
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?
            .query_map([limit_param], |row| {
                Ok(MarketNote {
                    sender: row.get(0)?,
                    text: row.get(1)?,
                    timestamp: from_millis(row.get(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(merge_newest_first(signals, notes, limit))
    }

    async fn close(&self) {
        // The connection closes on drop; nothing is held open between calls.
        debug!("SQLite store closed");
    }
}

fn decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn parse_decimal(value: Option<String>) -> Option<Decimal> {
    value.and_then(|s| Decimal::from_str(&s).ok())
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<Signal> {
    let setup_type: String = row.get(1)?;
    Ok(Signal {
        pair: row.get(0)?,
        setup_type: setup_type.parse::<SetupType>().unwrap_or_default(),
        entry: parse_decimal(row.get(2)?),
        leverage: row.get(3)?,
        tp1: parse_decimal(row.get(4)?),
        tp2: parse_decimal(row.get(5)?),
        tp3: parse_decimal(row.get(6)?),
        tp4: parse_decimal(row.get(7)?),
        stop_loss: parse_decimal(row.get(8)?),
        timestamp: from_millis(row.get(9)?),
        full_message: row.get(10)?,
    })
}
