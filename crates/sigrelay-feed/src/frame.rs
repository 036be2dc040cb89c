//! Relay wire format.
//!
//! Inbound frames are JSON objects:
//!
//! ```json
//! {"text": "...", "date": "2024-05-01T08:00:00+00:00", "sender": "Alice", "chat": "signals"}
//! ```
//!
//! `message` is accepted for `text` and `timestamp` for `date`. The date may
//! be RFC 3339, a naive ISO-8601 timestamp (taken as UTC) or Unix seconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sigrelay_core::RawMessage;

/// One frame received from the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayFrame {
    #[serde(default, alias = "message")]
    pub text: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub date: Option<FrameTime>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub chat: Option<String>,
}

/// Frame timestamp in any of the accepted encodings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FrameTime {
    Unix(i64),
    Text(String),
}

impl FrameTime {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Unix(secs) => Utc.timestamp_opt(*secs, 0).single(),
            Self::Text(s) => parse_timestamp(s),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl RelayFrame {
    /// True when the frame belongs to `channel` (or carries no chat id).
    pub fn matches_channel(&self, channel: Option<&str>) -> bool {
        match (channel, self.chat.as_deref()) {
            (Some(wanted), Some(chat)) => wanted == chat,
            _ => true,
        }
    }

    /// Convert to a `RawMessage`.
    ///
    /// Returns `None` for frames without text (acknowledgements, keepalives).
    /// A missing or unreadable date falls back to `received_at`.
    pub fn into_raw(self, received_at: DateTime<Utc>) -> Option<RawMessage> {
        let text = self.text?;
        let timestamp = self
            .date
            .as_ref()
            .and_then(FrameTime::to_utc)
            .unwrap_or(received_at);

        Some(RawMessage {
            text,
            timestamp,
            sender_label: self.sender,
            source_channel: self.chat,
        })
    }
}

/// Subscription request sent after connecting.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
}

impl<'a> SubscribeRequest<'a> {
    pub fn new(channel: Option<&'a str>, token: Option<&'a str>) -> Self {
        Self {
            op: "subscribe",
            channel,
            token,
        }
    }
}
