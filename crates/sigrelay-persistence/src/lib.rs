//! Buffered, idempotent persistence for sigrelay.
//!
//! Classified records accumulate in a [`Buffer`]; a [`BatchWriter`] drains
//! it on an interval or when a list reaches the batch size and writes each
//! list to a [`Store`] in its own transaction. Duplicate records (same
//! natural key) are ignored by the store.

pub mod buffer;
pub mod error;
pub mod postgres;
pub mod spool;
pub mod sqlite;
pub mod store;
pub mod writer;

pub use buffer::{Buffer, Pending};
pub use error::{PersistenceError, PersistenceResult};
pub use postgres::{PgStore, PgStoreConfig};
pub use spool::FailedBatchSpool;
pub use sqlite::SqliteStore;
pub use store::{Store, NOTE_TABLE, SIGNAL_TABLE};
pub use writer::{BatchWriter, FlushReport, SpoolConfig, WriterConfig};
