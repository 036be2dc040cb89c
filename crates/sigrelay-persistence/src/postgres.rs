//! PostgreSQL store backed by a `deadpool-postgres` pool.

use crate::error::PersistenceResult;
use crate::store::{merge_newest_first, Store};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use rust_decimal::Decimal;
use sigrelay_core::{
    ClassifiedMessage, MarketNote, SetupType, Signal, UNKNOWN_PAIR, UNKNOWN_SENDER,
};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signal_messages (
    id BIGSERIAL PRIMARY KEY,
    pair TEXT NOT NULL,
    setup_type VARCHAR(10) NOT NULL,
    entry NUMERIC(30,8),
    leverage INTEGER,
    tp1 NUMERIC(30,8),
    tp2 NUMERIC(30,8),
    tp3 NUMERIC(30,8),
    tp4 NUMERIC(30,8),
    stop_loss NUMERIC(30,8),
    timestamp TIMESTAMP NOT NULL,
    full_message TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS signal_messages_full_message_key
    ON signal_messages (full_message);
CREATE INDEX IF NOT EXISTS idx_signal_messages_timestamp ON signal_messages (timestamp);
CREATE INDEX IF NOT EXISTS idx_signal_messages_pair ON signal_messages (pair);

CREATE TABLE IF NOT EXISTS market_messages (
    id BIGSERIAL PRIMARY KEY,
    sender TEXT NOT NULL,
    text TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS market_messages_text_key ON market_messages (text);
CREATE INDEX IF NOT EXISTS idx_market_messages_timestamp ON market_messages (timestamp);
"#;

const INSERT_SIGNAL_SQL: &str = "INSERT INTO signal_messages \
    (pair, setup_type, entry, leverage, tp1, tp2, tp3, tp4, stop_loss, timestamp, full_message) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
    ON CONFLICT DO NOTHING";

const INSERT_NOTE_SQL: &str = "INSERT INTO market_messages (sender, text, timestamp) \
    VALUES ($1, $2, $3) ON CONFLICT DO NOTHING";

const RECENT_SIGNALS_SQL: &str = "SELECT pair, setup_type, entry, leverage, tp1, tp2, tp3, tp4, \
    stop_loss, timestamp, full_message FROM signal_messages ORDER BY timestamp DESC LIMIT $1";

const RECENT_NOTES_SQL: &str =
    "SELECT sender, text, timestamp FROM market_messages ORDER BY timestamp DESC LIMIT $1";

/// Connection settings for [`PgStore`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub url: String,
    pub pool_max_size: usize,
    pub connect_timeout_ms: u64,
}

/// PostgreSQL store.
///
/// Connections are verified on checkout. Timestamps are stored as naive
/// UTC `TIMESTAMP` values.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build the pool. No connection is made until first use.
    pub fn connect(config: &PgStoreConfig) -> PersistenceResult<Self> {
        let timeout = Some(Duration::from_millis(config.connect_timeout_ms));

        let mut pool_config = PoolConfig::new(config.pool_max_size.max(1));
        pool_config.timeouts = Timeouts {
            wait: timeout,
            create: timeout,
            recycle: timeout,
        };

        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Verified,
        });
        cfg.pool = Some(pool_config);

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        info!(max_size = config.pool_max_size, "PostgreSQL pool created");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> PersistenceResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        info!("PostgreSQL schema ensured");
        Ok(())
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn insert_signals(&self, signals: &[Signal]) -> PersistenceResult<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx.prepare_cached(INSERT_SIGNAL_SQL).await?;

        let mut inserted = 0;
        for signal in signals {
            let timestamp = signal.timestamp.naive_utc();
            inserted += tx
                .execute(
                    &stmt,
                    &[
                        &signal.pair,
                        &signal.setup_type.as_str(),
                        &signal.entry,
                        &signal.leverage,
                        &signal.tp1,
                        &signal.tp2,
                        &signal.tp3,
                        &signal.tp4,
                        &signal.stop_loss,
                        &timestamp,
                        &signal.full_message,
                    ],
                )
                .await?;
        }

        tx.commit().await?;
        debug!(batch = signals.len(), inserted, "Signals committed");
        Ok(inserted)
    }

    async fn insert_notes(&self, notes: &[MarketNote]) -> PersistenceResult<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx.prepare_cached(INSERT_NOTE_SQL).await?;

        let mut inserted = 0;
        for note in notes {
            let timestamp = note.timestamp.naive_utc();
            inserted += tx
                .execute(&stmt, &[&note.sender, &note.text, &timestamp])
                .await?;
        }

        tx.commit().await?;
        debug!(batch = notes.len(), inserted, "Market notes committed");
        Ok(inserted)
    }

    async fn recent_messages(&self, limit: usize) -> PersistenceResult<Vec<ClassifiedMessage>> {
        let client = self.pool.get().await?;
        let limit_param = limit as i64;

        let signals = client
            .query(RECENT_SIGNALS_SQL, &[&limit_param])
            .await?
            .iter()
            .map(signal_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let notes = client
            .query(RECENT_NOTES_SQL, &[&limit_param])
            .await?
            .iter()
            .map(note_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(merge_newest_first(signals, notes, limit))
    }

    async fn close(&self) {
        self.pool.close();
        info!("PostgreSQL pool closed");
    }
}

fn signal_from_row(row: &Row) -> Result<Signal, tokio_postgres::Error> {
    let setup_type: Option<String> = row.try_get("setup_type")?;
    let timestamp: NaiveDateTime = row.try_get("timestamp")?;
    Ok(Signal {
        pair: row
            .try_get::<_, Option<String>>("pair")?
            .unwrap_or_else(|| UNKNOWN_PAIR.to_string()),
        setup_type: setup_type
            .and_then(|s| s.parse::<SetupType>().ok())
            .unwrap_or_default(),
        entry: row.try_get::<_, Option<Decimal>>("entry")?,
        leverage: row.try_get("leverage")?,
        tp1: row.try_get("tp1")?,
        tp2: row.try_get("tp2")?,
        tp3: row.try_get("tp3")?,
        tp4: row.try_get("tp4")?,
        stop_loss: row.try_get("stop_loss")?,
        timestamp: timestamp.and_utc(),
        full_message: row.try_get("full_message")?,
    })
}

fn note_from_row(row: &Row) -> Result<MarketNote, tokio_postgres::Error> {
    let timestamp: NaiveDateTime = row.try_get("timestamp")?;
    Ok(MarketNote {
        sender: row
            .try_get::<_, Option<String>>("sender")?
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        text: row.try_get("text")?,
        timestamp: timestamp.and_utc(),
    })
}
