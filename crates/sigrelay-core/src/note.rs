//! Unstructured market commentary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender recorded when the source supplies no label.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// A message that did not qualify as a signal.
///
/// `text` is the natural deduplication key in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketNote {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MarketNote {
    /// Build a note, falling back to `UNKNOWN_SENDER` for a missing or blank label.
    pub fn new(sender: Option<&str>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let sender = match sender.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => UNKNOWN_SENDER.to_string(),
        };
        Self {
            sender,
            text: text.into(),
            timestamp,
        }
    }

    #[inline]
    pub fn dedup_key(&self) -> &str {
        &self.text
    }
}
