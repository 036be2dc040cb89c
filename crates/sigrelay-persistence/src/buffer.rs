//! In-memory accumulator of records awaiting a flush.

use parking_lot::Mutex;
use sigrelay_core::{ClassifiedMessage, MarketNote, Signal};
use tokio::sync::Notify;

/// Records drained from the buffer, in append order per list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pending {
    pub signals: Vec<Signal>,
    pub notes: Vec<MarketNote>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.signals.len() + self.notes.len()
    }
}

/// Pending signals and notes guarded by a single lock.
///
/// `append` and `drain` are mutually exclusive, so a drain observes every
/// append that completed before it and none that start after it.
pub struct Buffer {
    pending: Mutex<Pending>,
    batch_size: usize,
    threshold: Notify,
}

impl Buffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            batch_size: batch_size.max(1),
            threshold: Notify::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append a classified record to its list.
    ///
    /// Returns `true` when that list has reached the batch size, in which
    /// case a waiter on [`Buffer::threshold_reached`] is woken.
    pub fn append(&self, record: ClassifiedMessage) -> bool {
        let reached = {
            let mut pending = self.pending.lock();
            match record {
                ClassifiedMessage::Signal(signal) => {
                    pending.signals.push(signal);
                    pending.signals.len() >= self.batch_size
                }
                ClassifiedMessage::Market(note) => {
                    pending.notes.push(note);
                    pending.notes.len() >= self.batch_size
                }
            }
        };

        if reached {
            self.threshold.notify_one();
        }
        reached
    }

    /// Atomically take everything pending, leaving the buffer empty.
    pub fn drain(&self) -> Pending {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Pending counts as `(signals, notes)`.
    pub fn counts(&self) -> (usize, usize) {
        let pending = self.pending.lock();
        (pending.signals.len(), pending.notes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Resolves once an append has pushed a list to the batch size.
    ///
    /// A notification raised while nobody is waiting is kept for the next
    /// waiter.
    pub async fn threshold_reached(&self) {
        self.threshold.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sigrelay_core::SetupType;
    use std::sync::Arc;
    use std::time::Duration;

    fn note(text: &str) -> ClassifiedMessage {
        ClassifiedMessage::Market(MarketNote::new(None, text, Utc::now()))
    }

    fn signal(text: &str) -> ClassifiedMessage {
        ClassifiedMessage::Signal(Signal {
            pair: "BTCUSDT".to_string(),
            setup_type: SetupType::Long,
            entry: None,
            leverage: None,
            tp1: None,
            tp2: None,
            tp3: None,
            tp4: None,
            stop_loss: None,
            timestamp: Utc::now(),
            full_message: text.to_string(),
        })
    }

    #[test]
    fn test_append_routes_by_kind() {
        let buffer = Buffer::new(10);
        buffer.append(signal("s1"));
        buffer.append(note("n1"));
        buffer.append(note("n2"));
        assert_eq!(buffer.counts(), (1, 2));

        let drained = buffer.drain();
        assert_eq!(drained.signals.len(), 1);
        assert_eq!(
            drained.notes.iter().map(|n| n.text.as_str()).collect::<Vec<_>>(),
            vec!["n1", "n2"]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_duplicates_are_kept_until_flush() {
        let buffer = Buffer::new(10);
        buffer.append(note("same"));
        buffer.append(note("same"));
        assert_eq!(buffer.counts(), (0, 2));
    }

    #[test]
    fn test_threshold_per_list() {
        let buffer = Buffer::new(2);
        assert!(!buffer.append(signal("s1")));
        assert!(!buffer.append(note("n1")));
        assert!(buffer.append(signal("s2")));
    }

    #[tokio::test]
    async fn test_threshold_wakes_waiter() {
        let buffer = Arc::new(Buffer::new(1));
        buffer.append(note("n1"));
        tokio::time::timeout(Duration::from_millis(100), buffer.threshold_reached())
            .await
            .expect("stored notification should resolve immediately");
    }

    #[test]
    fn test_drain_is_atomic_under_concurrent_appends() {
        let buffer = Arc::new(Buffer::new(usize::MAX));
        let per_thread = 1_000;
        let threads = 4;

        let writers: Vec<_> = (0..threads)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        buffer.append(note(&format!("{t}-{i}")));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while writers.iter().any(|w| !w.is_finished()) {
            drained.extend(buffer.drain().notes);
        }
        for w in writers {
            w.join().unwrap();
        }
        drained.extend(buffer.drain().notes);

        let mut keys: Vec<_> = drained.into_iter().map(|n| n.text).collect();
        assert_eq!(keys.len(), threads * per_thread);
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), threads * per_thread);
        assert!(buffer.is_empty());
    }
}
