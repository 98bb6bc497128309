//! Metrics collection and export for sockit.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use sockit_core::MeshStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "sockit_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "sockit_connections_active";
    pub const MESSAGES_TOTAL: &str = "sockit_messages_total";
    pub const MESSAGES_BYTES: &str = "sockit_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "sockit_rooms_active";
    pub const CLIENTS_REGISTERED: &str = "sockit_clients_registered";
    pub const MEMBERSHIPS_ACTIVE: &str = "sockit_memberships_active";
    pub const DROPPED_TOTAL: &str = "sockit_dropped_total";
    pub const LATENCY_SECONDS: &str = "sockit_latency_seconds";
    pub const ERRORS_TOTAL: &str = "sockit_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_gauge!(
        names::CLIENTS_REGISTERED,
        "Current number of clients registered with the mesh"
    );
    metrics::describe_gauge!(
        names::MEMBERSHIPS_ACTIVE,
        "Sum of all room memberships"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Messages and events dropped, by reason"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
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

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a message the server itself could not deliver.
pub fn record_dropped(reason: &'static str) {
    counter!(names::DROPPED_TOTAL, "reason" => reason).increment(1);
}

/// Mirror the mesh's own counters and sizes.
pub fn set_mesh_stats(stats: &MeshStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::CLIENTS_REGISTERED).set(stats.client_count as f64);
    gauge!(names::MEMBERSHIPS_ACTIVE).set(stats.total_memberships as f64);
    counter!(names::DROPPED_TOTAL, "reason" => "room_queue_full").absolute(stats.messages_dropped);
    counter!(names::DROPPED_TOTAL, "reason" => "unroutable").absolute(stats.messages_unroutable);
    counter!(names::DROPPED_TOTAL, "reason" => "event_queue_full").absolute(stats.events_dropped);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
    fn test_metrics_guard() {
        // No recorder installed; just must not panic.
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_set_mesh_stats_without_recorder() {
        let stats = MeshStats {
            room_count: 3,
            messages_dropped: 2,
            ..MeshStats::default()
        };
        set_mesh_stats(&stats);
        record_dropped("client_queue_full");
    }
}
