//! Bulk import of past messages from a JSON Lines archive.
//!
//! Fetched messages are classified and buffered like live ones but are not
//! broadcast. The buffer is flushed immediately afterwards; duplicates of
//! rows already stored are ignored by the store.

use async_trait::async_trait;
use sigrelay_core::ClassifiedMessage;
use sigrelay_dashboard::{Backfill, BackfillError, BackfillOutcome};
use sigrelay_feed::JsonlArchive;
use sigrelay_parser::classify_message;
use sigrelay_persistence::{BatchWriter, Buffer};
use sigrelay_telemetry::Metrics;
use std::sync::Arc;
use tracing::info;

pub struct ArchiveBackfill {
    archive: JsonlArchive,
    limit: usize,
    buffer: Arc<Buffer>,
    writer: Arc<BatchWriter>,
}

impl ArchiveBackfill {
    pub fn new(
        archive: JsonlArchive,
        limit: usize,
        buffer: Arc<Buffer>,
        writer: Arc<BatchWriter>,
    ) -> Self {
        Self {
            archive,
            limit,
            buffer,
            writer,
        }
    }
}

#[async_trait]
impl Backfill for ArchiveBackfill {
    async fn fetch_past(&self) -> Result<BackfillOutcome, BackfillError> {
        let messages = self.archive.fetch_recent(self.limit).await?;
        info!(
            path = %self.archive.path().display(),
            count = messages.len(),
            "Fetched past messages"
        );

        let mut outcome = BackfillOutcome {
            fetched: messages.len(),
            ..BackfillOutcome::default()
        };
        for raw in &messages {
            let Some(classified) = classify_message(raw) else {
                Metrics::message("ignored");
                continue;
            };
            match &classified {
                ClassifiedMessage::Signal(_) => outcome.signals += 1,
                ClassifiedMessage::Market(_) => outcome.notes += 1,
            }
            Metrics::message(classified.kind().as_str());
            self.buffer.append(classified);
        }

        let report = self.writer.flush().await;
        if report.skipped {
            return Err(format!(
                "Store unavailable; {} messages left buffered",
                outcome.signals + outcome.notes
            )
            .into());
        }
        if report.had_failures() {
            return Err(format!(
                "Failed to store {} signals and {} market notes",
                report.signals_dropped, report.notes_dropped
            )
            .into());
        }

        outcome.inserted = report.signals_inserted + report.notes_inserted;
        info!(?outcome, "Backfill stored");
        Ok(outcome)
    }
}
