//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sip_messages_framed_total` (counter): messages handed to dispatch
//! - `sip_messages_rejected_total{reason}` (counter): dropped messages
//! - `sip_connections_total` (counter): accepted stream connections
//! - `sip_active_connections` (gauge): connections currently being read
//! - `sip_connections_closed_total{reason}` (counter): why readers stopped
//! - `sip_dispatch_failures_total` (counter): handler errors and panics
//! - `sip_dispatch_discarded_total` (counter): queued messages dropped on close
//! - `sip_pool_stuck_tasks_total` (counter): tasks flagged by the watchdog
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests quiet
//! - The Prometheus exporter is only installed by the binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_message_framed() {
    metrics::counter!("sip_messages_framed_total").increment(1);
}

pub fn record_message_rejected(reason: &'static str) {
    metrics::counter!("sip_messages_rejected_total", "reason" => reason).increment(1);
}

pub fn record_connection_opened() {
    metrics::counter!("sip_connections_total").increment(1);
    metrics::gauge!("sip_active_connections").increment(1.0);
}

pub fn record_connection_released() {
    metrics::gauge!("sip_active_connections").decrement(1.0);
}

pub fn record_connection_closed(reason: &'static str) {
    metrics::counter!("sip_connections_closed_total", "reason" => reason).increment(1);
}

pub fn record_dispatch_failure() {
    metrics::counter!("sip_dispatch_failures_total").increment(1);
}

pub fn record_dispatch_discarded(count: usize) {
    metrics::counter!("sip_dispatch_discarded_total").increment(count as u64);
}

pub fn record_stuck_task() {
    metrics::counter!("sip_pool_stuck_tasks_total").increment(1);
}
