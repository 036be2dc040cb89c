//! Live subscriber registry and fan-out.
//!
//! Every classified message is serialized once and sent to all registered
//! subscribers concurrently. A subscriber whose send fails, or that is no
//! longer alive, is removed; the other sends are unaffected. There is no
//! backlog: a subscriber only sees events published while it is registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use sigrelay_core::ClassifiedMessage;
use sigrelay_telemetry::Metrics;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{BroadcastError, BroadcastResult};

/// Close code sent to a connection rejected at the subscriber cap.
pub const CLOSE_CAPACITY: u16 = 1008;
/// Close reason sent with [`CLOSE_CAPACITY`].
pub const CLOSE_CAPACITY_REASON: &str = "Max connections reached";
/// Close code sent to every subscriber at shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A live, per-client channel.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Deliver one text frame.
    async fn send(&self, text: &str) -> BroadcastResult<()>;

    /// False once the client has gone away.
    fn is_alive(&self) -> bool;

    /// Close the channel with a status code.
    async fn close(&self, code: u16, reason: &str);
}

/// Registry key for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub removed: usize,
}

/// Subscriber set with a fixed upper bound.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    max_subscribers: usize,
}

impl Broadcaster {
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            max_subscribers,
        }
    }

    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Add a subscriber.
    ///
    /// At the cap the subscriber is closed with [`CLOSE_CAPACITY`] and
    /// `CapacityReached` is returned.
    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) -> BroadcastResult<SubscriberId> {
        let admitted = {
            let mut subscribers = self.subscribers.write();
            if subscribers.len() >= self.max_subscribers {
                None
            } else {
                let id = SubscriberId::new();
                subscribers.insert(id, subscriber.clone());
                Some((id, subscribers.len()))
            }
        };

        match admitted {
            Some((id, count)) => {
                Metrics::subscribers_set(count);
                info!(%id, subscribers = count, "Subscriber registered");
                Ok(id)
            }
            None => {
                Metrics::subscriber_rejected();
                warn!(max = self.max_subscribers, "Subscriber limit reached, rejecting");
                subscriber
                    .close(CLOSE_CAPACITY, CLOSE_CAPACITY_REASON)
                    .await;
                Err(BroadcastError::CapacityReached {
                    max: self.max_subscribers,
                })
            }
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            Metrics::subscribers_set(count);
            debug!(%id, subscribers = count, "Subscriber unregistered");
        }
        removed
    }

    /// Publish a classified message to every subscriber.
    ///
    /// Never fails: a serialization error is logged and nothing is sent.
    pub async fn publish(&self, event: &ClassifiedMessage) -> PublishReport {
        match event.to_event_json() {
            Ok(text) => self.publish_text(&text).await,
            Err(e) => {
                warn!(error = %e, "Failed to serialize broadcast event");
                PublishReport::default()
            }
        }
    }

    /// Send an already-serialized frame to every subscriber.
    pub async fn publish_text(&self, text: &str) -> PublishReport {
        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        if targets.is_empty() {
            trace!("No subscribers, broadcast skipped");
            return PublishReport::default();
        }

        let results = join_all(targets.iter().map(|(id, subscriber)| async move {
            if !subscriber.is_alive() {
                return Some(*id);
            }
            match subscriber.send(text).await {
                Ok(()) => None,
                Err(e) => {
                    debug!(%id, error = %e, "Send to subscriber failed");
                    Some(*id)
                }
            }
        }))
        .await;

        let failed: Vec<SubscriberId> = results.into_iter().flatten().collect();
        let removed = if failed.is_empty() {
            0
        } else {
            let mut subscribers = self.subscribers.write();
            let removed = failed
                .iter()
                .filter(|id| subscribers.remove(*id).is_some())
                .count();
            Metrics::subscribers_set(subscribers.len());
            removed
        };

        Metrics::broadcast(failed.len() as u64);
        let report = PublishReport {
            delivered: targets.len() - failed.len(),
            removed,
        };
        trace!(?report, "Broadcast sent");
        report
    }

    /// Close and remove every subscriber.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let drained: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .write()
            .drain()
            .map(|(_, s)| s)
            .collect();
        Metrics::subscribers_set(0);

        let count = drained.len();
        join_all(drained.iter().map(|s| s.close(code, reason))).await;
        info!(count, code, "Closed all subscribers");
    }
}
