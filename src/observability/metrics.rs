//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hermina_sessions_total` (counter): sessions started, by listener
//! - `hermina_sessions_active` (gauge): live sessions, by listener
//! - `hermina_packets_total` (counter): packets by direction and outcome
//! - `hermina_connection_errors_total` (counter): per-connection failures by kind
//! - `hermina_http_requests_total` (counter): proxied HTTP requests by status

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::session::Direction;

/// What happened to a packet read by a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Forwarded,
    Vetoed,
    Dropped,
}

impl PacketOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketOutcome::Forwarded => "forwarded",
            PacketOutcome::Vetoed => "vetoed",
            PacketOutcome::Dropped => "dropped",
        }
    }
}

/// Install the Prometheus exporter with a scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_session_started(listener: &str) {
    counter!("hermina_sessions_total", "listener" => listener.to_string()).increment(1);
    gauge!("hermina_sessions_active", "listener" => listener.to_string()).increment(1.0);
}

pub fn record_session_ended(listener: &str) {
    gauge!("hermina_sessions_active", "listener" => listener.to_string()).decrement(1.0);
}

pub fn record_packet(direction: Direction, outcome: PacketOutcome) {
    counter!(
        "hermina_packets_total",
        "direction" => direction.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_connection_error(listener: &str, kind: &'static str) {
    counter!(
        "hermina_connection_errors_total",
        "listener" => listener.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_http_request(status: u16) {
    counter!("hermina_http_requests_total", "status" => status.to_string()).increment(1);
}
