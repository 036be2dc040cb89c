//! Signal vs. market-note classification.

use sigrelay_core::MessageKind;

/// Trimmed, non-blank lines of a message.
pub fn content_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Classify message text.
///
/// A message is a signal when it has a `#`-prefixed line and, somewhere
/// (case-insensitive), the tokens "entry", "profit" and "loss". Anything
/// else is a market note.
pub fn classify(text: &str) -> MessageKind {
    let lines: Vec<String> = content_lines(text)
        .into_iter()
        .map(str::to_lowercase)
        .collect();

    let has_tag = lines.iter().any(|l| l.starts_with('#'));
    let has = |token: &str| lines.iter().any(|l| l.contains(token));

    if has_tag && has("entry") && has("profit") && has("loss") {
        MessageKind::Signal
    } else {
        MessageKind::MarketNote
    }
}
