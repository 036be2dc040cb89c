//! Prometheus metrics for the sigrelay pipeline.
//!
//! # Panics
//!
//! Metric registration unwraps. A failure there means a duplicate metric
//! name, which is a programming error surfaced on first use.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};

/// Messages consumed by the pipeline.
/// Labels: kind (signal/market/ignored)
pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sigrelay_messages_total",
        "Messages consumed by the pipeline",
        &["kind"]
    )
    .unwrap()
});

/// Records waiting in the buffer.
/// Labels: list (signals/notes)
pub static BUFFER_PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "sigrelay_buffer_pending",
        "Records waiting in the buffer",
        &["list"]
    )
    .unwrap()
});

/// Flush attempts per table.
/// Labels: table, outcome (ok/error)
pub static FLUSH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sigrelay_flush_total",
        "Batch flush attempts",
        &["table", "outcome"]
    )
    .unwrap()
});

pub static ROWS_INSERTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sigrelay_rows_inserted_total",
        "Rows inserted (duplicates excluded)",
        &["table"]
    )
    .unwrap()
});

pub static ROWS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sigrelay_rows_dropped_total",
        "Rows dropped after a failed flush",
        &["table"]
    )
    .unwrap()
});

pub static FLUSH_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sigrelay_flush_duration_ms",
        "Batch flush duration in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

pub static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("sigrelay_subscribers", "Registered live subscribers").unwrap()
});

pub static SUBSCRIBERS_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sigrelay_subscribers_rejected_total",
        "Subscribers rejected at the connection cap"
    )
    .unwrap()
});

pub static BROADCAST_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("sigrelay_broadcast_total", "Events published").unwrap()
});

pub static BROADCAST_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sigrelay_broadcast_failures_total",
        "Subscriber sends that failed"
    )
    .unwrap()
});

/// Message source connection state (1 = connected).
pub static SOURCE_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sigrelay_source_connected",
        "Message source connection state (1=connected)"
    )
    .unwrap()
});

pub static SOURCE_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sigrelay_source_reconnect_total",
        "Message source reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a consumed message by kind.
    pub fn message(kind: &str) {
        MESSAGES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn buffer_pending(signals: usize, notes: usize) {
        BUFFER_PENDING
            .with_label_values(&["signals"])
            .set(signals as i64);
        BUFFER_PENDING.with_label_values(&["notes"]).set(notes as i64);
    }

    /// Record a successful table flush.
    pub fn flush_ok(table: &str, inserted: u64) {
        FLUSH_TOTAL.with_label_values(&[table, "ok"]).inc();
        ROWS_INSERTED_TOTAL
            .with_label_values(&[table])
            .inc_by(inserted);
    }

    /// Record a failed table flush.
    pub fn flush_failed(table: &str, dropped: u64) {
        FLUSH_TOTAL.with_label_values(&[table, "error"]).inc();
        ROWS_DROPPED_TOTAL.with_label_values(&[table]).inc_by(dropped);
    }

    pub fn flush_duration(duration_ms: f64) {
        FLUSH_DURATION_MS.observe(duration_ms);
    }

    pub fn subscribers_set(count: usize) {
        SUBSCRIBERS.set(count as i64);
    }

    pub fn subscriber_rejected() {
        SUBSCRIBERS_REJECTED_TOTAL.inc();
    }

    pub fn broadcast(failures: u64) {
        BROADCAST_TOTAL.inc();
        BROADCAST_FAILURES_TOTAL.inc_by(failures);
    }

    pub fn source_connected() {
        SOURCE_CONNECTED.set(1);
    }

    pub fn source_disconnected() {
        SOURCE_CONNECTED.set(0);
    }

    pub fn source_reconnect(reason: &str) {
        SOURCE_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
