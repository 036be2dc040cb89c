//! Labeled field extraction.

const BULLET: char = '•';
const SKULL: char = '☠';

/// Find the value following `label` in `lines`.
///
/// The first line whose lowercase form contains the lowercase label wins.
/// Its value is everything after the first `:`, trimmed, with bullet glyphs
/// removed. For stop-loss labels the value is cut at the skull glyph.
/// Returns `None` when no line matches or the first match has no `:`.
pub fn extract_value<S: AsRef<str>>(label: &str, lines: &[S]) -> Option<String> {
    let label_lower = label.to_lowercase();
    let line = lines
        .iter()
        .map(AsRef::as_ref)
        .find(|line| line.to_lowercase().contains(&label_lower))?;

    let (_, rest) = line.split_once(':')?;
    let mut value: String = rest.chars().filter(|c| *c != BULLET).collect();

    if is_stop_loss_label(&label_lower) {
        if let Some(idx) = value.find(SKULL) {
            value.truncate(idx);
        }
    }

    Some(value.trim().to_string())
}

fn is_stop_loss_label(label_lower: &str) -> bool {
    label_lower.contains("stop loss") || label_lower == "sl"
}
