//! sigrelay-dashboard - live fan-out of classified messages.
//!
//! - [`Broadcaster`]: bounded subscriber set, concurrent best-effort sends
//! - axum server: `/ws` subscriber stream, `/fetch-past` backfill trigger,
//!   `/api/messages` stored history, `/health`, `/metrics`
//!
//! # Usage
//!
//! ```ignore
//! use sigrelay_dashboard::{run_server, AppState, Broadcaster, DashboardConfig};
//!
//! let broadcaster = Arc::new(Broadcaster::new(config.max_subscribers));
//! let state = AppState::new(broadcaster.clone(), buffer, store, config);
//! tokio::spawn(run_server(state, shutdown.clone()));
//!
//! broadcaster.publish(&classified).await;
//! ```

mod broadcast;
mod config;
mod error;
mod server;
mod state;
mod types;

pub use broadcast::{
    Broadcaster, PublishReport, Subscriber, SubscriberId, CLOSE_CAPACITY, CLOSE_CAPACITY_REASON,
    CLOSE_GOING_AWAY,
};
pub use config::DashboardConfig;
pub use error::{BroadcastError, BroadcastResult};
pub use server::{
    bind, create_router, run_server, serve, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
pub use state::{AppState, Backfill, BackfillError};
pub use types::{BackfillOutcome, HealthResponse, MessagesQuery, StatusResponse};
