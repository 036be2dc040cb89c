//! Message history read from a JSON Lines export.
//!
//! Each line holds one relay frame. Used to backfill messages published
//! before the live connection existed.

use crate::error::FeedResult;
use crate::frame::RelayFrame;
use chrono::Utc;
use sigrelay_core::RawMessage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default number of messages returned by a fetch.
pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// JSON Lines message archive.
#[derive(Debug, Clone)]
pub struct JsonlArchive {
    path: PathBuf,
    channel: Option<String>,
}

impl JsonlArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channel: None,
        }
    }

    /// Only return frames from `channel`.
    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `limit` most recent messages, oldest first.
    ///
    /// Undecodable lines and frames without text are skipped.
    pub async fn fetch_recent(&self, limit: usize) -> FeedResult<Vec<RawMessage>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let now = Utc::now();

        let mut messages: Vec<RawMessage> = Vec::new();
        let mut skipped = 0usize;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let frame: RelayFrame = match serde_json::from_str(line) {
                Ok(frame) => frame,
                Err(e) => {
                    skipped += 1;
                    warn!(line = idx + 1, error = %e, "Skipping undecodable archive line");
                    continue;
                }
            };
            if !frame.matches_channel(self.channel.as_deref()) {
                continue;
            }
            if let Some(raw) = frame.into_raw(now) {
                messages.push(raw);
            }
        }

        messages.sort_by_key(|m| m.timestamp);
        let start = messages.len().saturating_sub(limit);
        let recent = messages.split_off(start);

        debug!(
            path = %self.path.display(),
            returned = recent.len(),
            skipped,
            "Archive read"
        );
        Ok(recent)
    }
}
