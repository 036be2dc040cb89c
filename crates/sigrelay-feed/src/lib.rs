//! Message source for sigrelay.
//!
//! - [`RelaySource`]: WebSocket client for a message relay, with automatic
//!   reconnection (exponential backoff plus jitter) and graceful shutdown
//! - [`JsonlArchive`]: history read from a JSON Lines export, used for backfill
//!
//! Both produce [`sigrelay_core::RawMessage`] values from the same frame format.

pub mod archive;
pub mod connection;
pub mod error;
pub mod frame;

pub use archive::{JsonlArchive, DEFAULT_FETCH_LIMIT};
pub use connection::{ConnectionState, RelayConfig, RelaySource, RelayStream};
pub use error::{FeedError, FeedResult};
pub use frame::{RelayFrame, SubscribeRequest};
