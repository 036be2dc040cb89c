//! Typed signal construction.

use crate::classifier::content_lines;
use crate::extract::extract_value;
use crate::normalize::{to_decimal, to_leverage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sigrelay_core::{SetupType, Signal, UNKNOWN_PAIR};

const TARGET_LABELS: [(&str, &str); 4] = [
    ("Target 1", "TP1"),
    ("Target 2", "TP2"),
    ("Target 3", "TP3"),
    ("Target 4", "TP4"),
];

/// Build a `Signal` from text already classified as a signal.
pub fn parse_signal(text: &str, timestamp: DateTime<Utc>) -> Signal {
    let lines = content_lines(text);
    let header = lines.first().copied().unwrap_or_default();

    let [tp1, tp2, tp3, tp4] =
        TARGET_LABELS.map(|(primary, fallback)| price_field(&lines, primary, fallback));

    Signal {
        pair: parse_pair(header),
        setup_type: parse_setup_type(header),
        entry: lookup(&lines, "Entry", None).as_deref().and_then(to_decimal),
        leverage: lookup(&lines, "Leverage", None)
            .as_deref()
            .and_then(to_leverage),
        tp1,
        tp2,
        tp3,
        tp4,
        stop_loss: price_field(&lines, "Stop Loss", "SL"),
        timestamp,
        full_message: text.to_string(),
    }
}

fn parse_pair(header: &str) -> String {
    header
        .split_whitespace()
        .next()
        .map(|token| token.trim_matches('#'))
        .filter(|pair| !pair.is_empty())
        .unwrap_or(UNKNOWN_PAIR)
        .to_string()
}

fn parse_setup_type(header: &str) -> SetupType {
    let upper = header.to_uppercase();
    if upper.contains("LONG") {
        SetupType::Long
    } else if upper.contains("SHORT") {
        SetupType::Short
    } else {
        SetupType::Unknown
    }
}

/// Primary label first; an absent or empty value falls through to the fallback.
fn lookup(lines: &[&str], primary: &str, fallback: Option<&str>) -> Option<String> {
    extract_value(primary, lines)
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.and_then(|label| extract_value(label, lines)))
}

fn price_field(lines: &[&str], primary: &str, fallback: &str) -> Option<Decimal> {
    lookup(lines, primary, Some(fallback))
        .as_deref()
        .and_then(to_decimal)
}
