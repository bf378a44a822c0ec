//! Metrics collection and export for Murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use murmur_core::PublishReport;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SUBSCRIBERS_TOTAL: &str = "murmur_subscribers_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "murmur_subscribers_active";
    pub const MESSAGES_INGESTED: &str = "murmur_messages_ingested_total";
    pub const DELIVERIES_TOTAL: &str = "murmur_deliveries_total";
    pub const DELIVERY_ANOMALIES: &str = "murmur_delivery_anomalies_total";
    pub const FRAMES_BYTES: &str = "murmur_frames_bytes_total";
    pub const INGEST_LATENCY_SECONDS: &str = "murmur_ingest_latency_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SUBSCRIBERS_TOTAL,
        "Total number of event streams opened since server start"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of open event streams"
    );
    metrics::describe_counter!(names::MESSAGES_INGESTED, "Total number of messages stored");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of notifications enqueued to subscribers"
    );
    metrics::describe_counter!(
        names::DELIVERY_ANOMALIES,
        "Notifications skipped because the subscriber was gone"
    );
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes written to event streams");
    metrics::describe_histogram!(
        names::INGEST_LATENCY_SECONDS,
        "Time to store and broadcast a message in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a stored and broadcast message.
pub fn record_ingest(report: &PublishReport, seconds: f64) {
    counter!(names::MESSAGES_INGESTED).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
    if report.anomalies > 0 {
        counter!(names::DELIVERY_ANOMALIES).increment(report.anomalies as u64);
    }
    histogram!(names::INGEST_LATENCY_SECONDS).record(seconds);
}

/// Record a frame written to an event stream.
pub fn record_frame(bytes: usize) {
    counter!(names::FRAMES_BYTES).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Tracks one open event stream for as long as it is alive.
pub struct SubscriberMetricsGuard;

impl SubscriberMetricsGuard {
    /// Create a new metrics guard, recording an opened stream.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SUBSCRIBERS_TOTAL).increment(1);
        gauge!(names::SUBSCRIBERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SubscriberMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriberMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SUBSCRIBERS_ACTIVE).decrement(1.0);
    }
}
