//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sniffwire_frames_total` (counter): frames read, by classification outcome
//! - `sniffwire_flows_opened_total` (counter): flow directions opened
//! - `sniffwire_flows_closed_total` (counter): flow directions closed, by reason
//! - `sniffwire_flows_rejected_total` (counter): flows refused at `max_flows`
//! - `sniffwire_active_flows` (gauge): flow directions currently tracked
//! - `sniffwire_requests_total` (counter): requests dispatched
//! - `sniffwire_forwarded_total` (counter): forwarding attempts, by result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade everywhere; without an
//!   installed recorder the macros are no-ops
//! - The Prometheus exporter is opt-in

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;

use crate::config::ObservabilityConfig;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Invalid metrics address {0:?}")]
    Address(String),

    #[error("Failed to install metrics exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install the Prometheus exporter when enabled. Must run inside a Tokio
/// runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<(), MetricsError> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_address
        .parse()
        .map_err(|_| MetricsError::Address(config.metrics_address.clone()))?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    metrics::describe_counter!("sniffwire_frames_total", "Frames read, by classification outcome");
    metrics::describe_counter!("sniffwire_flows_opened_total", "Flow directions opened");
    metrics::describe_counter!("sniffwire_flows_closed_total", "Flow directions closed, by reason");
    metrics::describe_counter!("sniffwire_flows_rejected_total", "Flows refused at the flow limit");
    metrics::describe_gauge!("sniffwire_active_flows", "Flow directions currently tracked");
    metrics::describe_counter!("sniffwire_requests_total", "Requests dispatched to handlers");
    metrics::describe_counter!("sniffwire_forwarded_total", "Forwarding attempts, by result");
}
