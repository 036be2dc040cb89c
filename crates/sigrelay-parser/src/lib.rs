//! Message classification and signal extraction.
//!
//! Turns raw message text into either a structured `Signal` or a
//! `MarketNote`. Every function here is pure: parse anomalies surface as
//! `None` fields, never as errors.

pub mod classifier;
pub mod extract;
pub mod normalize;
pub mod signal_parser;

pub use classifier::{classify, content_lines};
pub use extract::extract_value;
pub use normalize::{to_decimal, to_leverage};
pub use signal_parser::parse_signal;

use sigrelay_core::{ClassifiedMessage, MarketNote, MessageKind, RawMessage};
use tracing::trace;

/// Classify a raw message and build its typed record.
///
/// Returns `None` for messages without visible text.
pub fn classify_message(raw: &RawMessage) -> Option<ClassifiedMessage> {
    if raw.is_blank() {
        trace!("Ignoring blank message");
        return None;
    }

    let classified = match classify(&raw.text) {
        MessageKind::Signal => ClassifiedMessage::Signal(parse_signal(&raw.text, raw.timestamp)),
        MessageKind::MarketNote => ClassifiedMessage::Market(MarketNote::new(
            raw.sender_label.as_deref(),
            raw.text.clone(),
            raw.timestamp,
        )),
    };
    Some(classified)
}
