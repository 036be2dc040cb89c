//! Structured trading signals.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pair recorded when the header line carries no usable token.
pub const UNKNOWN_PAIR: &str = "UNKNOWN";

/// Trade direction announced in the signal header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetupType {
    Long,
    Short,
    #[default]
    Unknown,
}

impl SetupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SetupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetupType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(CoreError::InvalidSetupType(s.to_string())),
        }
    }
}

/// A trading signal extracted from message text.
///
/// Price fields carry `PRICE_SCALE` fractional digits. Any field that could
/// not be read from the text is `None`. `full_message` is the original text
/// and serves as the natural deduplication key in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub setup_type: SetupType,
    pub entry: Option<Decimal>,
    pub leverage: Option<i32>,
    pub tp1: Option<Decimal>,
    pub tp2: Option<Decimal>,
    pub tp3: Option<Decimal>,
    pub tp4: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub full_message: String,
}

impl Signal {
    /// Take-profit levels in order (TP1..TP4).
    pub fn targets(&self) -> [Option<Decimal>; 4] {
        [self.tp1, self.tp2, self.tp3, self.tp4]
    }

    /// Deduplication key.
    #[inline]
    pub fn dedup_key(&self) -> &str {
        &self.full_message
    }
}
