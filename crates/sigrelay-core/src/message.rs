//! Raw inbound events and their classified form.

use crate::error::CoreError;
use crate::note::MarketNote;
use crate::signal::Signal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One text event as delivered by the message source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_label: Option<String>,
    pub source_channel: Option<String>,
}

impl RawMessage {
    pub fn new(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp,
            sender_label: None,
            source_channel: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender_label = Some(sender.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.source_channel = Some(channel.into());
        self
    }

    /// True when the text has no visible content.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Signal,
    MarketNote,
}

impl MessageKind {
    /// Label used on the wire and in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::MarketNote => "market",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Self::Signal),
            "market" | "market_note" => Ok(Self::MarketNote),
            _ => Err(CoreError::InvalidMessageKind(s.to_string())),
        }
    }
}

/// A classified message.
///
/// Serializes to the broadcast event shape: a flat object tagged with
/// `"type": "signal"` or `"type": "market"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifiedMessage {
    Signal(Signal),
    Market(MarketNote),
}

impl ClassifiedMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Signal(_) => MessageKind::Signal,
            Self::Market(_) => MessageKind::MarketNote,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Signal(s) => s.timestamp,
            Self::Market(n) => n.timestamp,
        }
    }

    pub fn dedup_key(&self) -> &str {
        match self {
            Self::Signal(s) => s.dedup_key(),
            Self::Market(n) => n.dedup_key(),
        }
    }

    /// Serialize to the JSON text sent to subscribers.
    pub fn to_event_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Signal> for ClassifiedMessage {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<MarketNote> for ClassifiedMessage {
    fn from(note: MarketNote) -> Self {
        Self::Market(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SetupType;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_signal_event_shape() {
        let event = ClassifiedMessage::Signal(Signal {
            pair: "BTCUSDT".to_string(),
            setup_type: SetupType::Long,
            entry: Some(dec!(50000.00000000)),
            leverage: Some(20),
            tp1: Some(dec!(52000.00000000)),
            tp2: None,
            tp3: None,
            tp4: None,
            stop_loss: None,
            timestamp: ts(),
            full_message: "#BTCUSDT LONG".to_string(),
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_event_json().unwrap()).unwrap();
        assert_eq!(value["type"], "signal");
        assert_eq!(value["pair"], "BTCUSDT");
        assert_eq!(value["setup_type"], "LONG");
        assert_eq!(value["entry"], "50000.00000000");
        assert_eq!(value["leverage"], 20);
        assert!(value["tp2"].is_null());
        assert_eq!(value["timestamp"], "2024-03-01T12:30:00Z");
        assert_eq!(value["full_message"], "#BTCUSDT LONG");
    }

    #[test]
    fn test_market_event_shape() {
        let event = ClassifiedMessage::Market(MarketNote::new(Some("Desk"), "Calm day", ts()));
        let value: serde_json::Value = serde_json::from_str(&event.to_event_json().unwrap()).unwrap();
        assert_eq!(value["type"], "market");
        assert_eq!(value["sender"], "Desk");
        assert_eq!(value["text"], "Calm day");
        assert_eq!(event.kind(), MessageKind::MarketNote);
        assert_eq!(event.dedup_key(), "Calm day");
    }

    #[test]
    fn test_event_deserializes_back() {
        let event = ClassifiedMessage::Market(MarketNote::new(None, "x", ts()));
        let json = event.to_event_json().unwrap();
        let back: ClassifiedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_blank_raw_message() {
        assert!(RawMessage::new(" \n\t", ts()).is_blank());
        assert!(!RawMessage::new("x", ts()).is_blank());
    }
}
