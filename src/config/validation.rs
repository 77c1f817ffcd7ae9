//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0, ports valid)
//! - Check that the capture source is fully described
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SniffwireConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::SniffwireConfig;

/// One semantic problem, with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &SniffwireConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.target_host.trim().is_empty() {
        errors.push(ValidationError::new("target_host", "must not be empty"));
    }
    if config.target_port == 0 {
        errors.push(ValidationError::new("target_port", "must be between 1 and 65535"));
    }

    let capture = &config.capture;
    if capture.live && capture.interface.trim().is_empty() {
        errors.push(ValidationError::new("capture.interface", "required for live capture"));
    }
    if !capture.live && capture.pcap_path.trim().is_empty() {
        errors.push(ValidationError::new("capture.pcap_path", "required when live = false"));
    }
    if capture.snaplen <= 0 {
        errors.push(ValidationError::new("capture.snaplen", "must be positive"));
    }
    if capture.read_timeout_ms <= 0 {
        errors.push(ValidationError::new("capture.read_timeout_ms", "must be positive"));
    }
    if capture.queue_frames == 0 {
        errors.push(ValidationError::new("capture.queue_frames", "must be at least 1"));
    }

    let reassembly = &config.reassembly;
    for (field, value) in [
        ("reassembly.idle_timeout_ms", reassembly.idle_timeout_ms),
        ("reassembly.flush_interval_ms", reassembly.flush_interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    for (field, value) in [
        ("reassembly.max_flows", reassembly.max_flows),
        ("reassembly.max_pending_segments", reassembly.max_pending_segments),
        ("reassembly.stream_queue_chunks", reassembly.stream_queue_chunks),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be at least 1"));
        }
    }

    let framing = &config.framing;
    if framing.max_header_bytes == 0 {
        errors.push(ValidationError::new("framing.max_header_bytes", "must be at least 1"));
    }
    if framing.max_resync_attempts == 0 {
        errors.push(ValidationError::new("framing.max_resync_attempts", "must be at least 1"));
    }

    let forwarding = &config.forwarding;
    if forwarding.workers == 0 {
        errors.push(ValidationError::new("forwarding.workers", "must be at least 1"));
    }
    if forwarding.queue_capacity == 0 {
        errors.push(ValidationError::new("forwarding.queue_capacity", "must be at least 1"));
    }
    if forwarding.request_timeout_secs == 0 {
        errors.push(ValidationError::new("forwarding.request_timeout_secs", "must be greater than 0"));
    }

    let observability = &config.observability;
    if !matches!(
        observability.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
