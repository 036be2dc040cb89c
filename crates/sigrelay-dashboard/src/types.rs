//! HTTP API types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Body returned by control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
    pub max_subscribers: usize,
    pub pending_signals: usize,
    pub pending_notes: usize,
}

/// Query of `GET /api/messages`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

/// Summary of a completed backfill.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub fetched: usize,
    pub signals: usize,
    pub notes: usize,
    pub inserted: u64,
}

impl fmt::Display for BackfillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fetched {} past messages ({} signals, {} market notes), {} new rows stored",
            self.fetched, self.signals, self.notes, self.inserted
        )
    }
}
