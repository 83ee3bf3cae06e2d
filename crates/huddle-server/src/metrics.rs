//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::SessionStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const MESSAGES_TOTAL: &str = "huddle_messages_total";
    pub const MESSAGES_BYTES: &str = "huddle_messages_bytes";
    pub const REQUESTS_TOTAL: &str = "huddle_requests_total";
    pub const REQUEST_LATENCY_SECONDS: &str = "huddle_request_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
    pub const ROOMS_ACTIVE: &str = "huddle_rooms_active";
    pub const PARTICIPANTS_ACTIVE: &str = "huddle_participants_active";
    pub const TRANSPORTS_ACTIVE: &str = "huddle_transports_active";
    pub const PRODUCERS_ACTIVE: &str = "huddle_producers_active";
    pub const CONSUMERS_ACTIVE: &str = "huddle_consumers_active";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of signaling connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of signaling connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Signaling requests by event");
    metrics::describe_histogram!(
        names::REQUEST_LATENCY_SECONDS,
        "Request handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Error replies by code");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(names::PARTICIPANTS_ACTIVE, "Participants that joined a room");
    metrics::describe_gauge!(names::TRANSPORTS_ACTIVE, "Registered WebRTC transports");
    metrics::describe_gauge!(names::PRODUCERS_ACTIVE, "Registered producers");
    metrics::describe_gauge!(names::CONSUMERS_ACTIVE, "Registered consumers");

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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a handled request and how long it took.
pub fn record_request(event: &'static str, seconds: f64) {
    counter!(names::REQUESTS_TOTAL, "event" => event).increment(1);
    histogram!(names::REQUEST_LATENCY_SECONDS, "event" => event).record(seconds);
}

/// Record an error reply.
pub fn record_error(code: u16) {
    counter!(names::ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Publish resource counts.
pub fn set_session_stats(stats: &SessionStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::PARTICIPANTS_ACTIVE).set(stats.participants as f64);
    gauge!(names::TRANSPORTS_ACTIVE).set(stats.transports as f64);
    gauge!(names::PRODUCERS_ACTIVE).set(stats.producers as f64);
    gauge!(names::CONSUMERS_ACTIVE).set(stats.consumers as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_request("joinRoom", 0.001);
        record_error(1004);
        set_session_stats(&SessionStats::default());
    }
}
