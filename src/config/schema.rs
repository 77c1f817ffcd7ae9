//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sniffer.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SniffwireConfig {
    /// Scheme used to reach the forwarding target.
    pub target_protocol: TargetProtocol,

    /// Host requests are replayed to.
    pub target_host: String,

    /// Port requests are replayed to.
    pub target_port: u16,

    /// Add `X-Forwarded-For` / `X-Forwarded-Port`.
    pub append_forwarded_headers: bool,

    /// Add `Sniffwire-Connecting-Ip` / `Sniffwire-Connecting-Port`.
    pub append_origin_headers: bool,

    /// Only forward requests addressed to this host.
    pub host_filter: Option<HostFilterConfig>,

    pub capture: CaptureConfig,

    pub reassembly: ReassemblyConfig,

    pub framing: FramingConfig,

    pub forwarding: ForwardingConfig,

    pub observability: ObservabilityConfig,
}

impl Default for SniffwireConfig {
    fn default() -> Self {
        Self {
            target_protocol: TargetProtocol::Http,
            target_host: "localhost".to_string(),
            target_port: 80,
            append_forwarded_headers: false,
            append_origin_headers: true,
            host_filter: None,
            capture: CaptureConfig::default(),
            reassembly: ReassemblyConfig::default(),
            framing: FramingConfig::default(),
            forwarding: ForwardingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProtocol {
    Http,
    Https,
}

impl TargetProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            TargetProtocol::Http => "http",
            TargetProtocol::Https => "https",
        }
    }
}

impl fmt::Display for TargetProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl std::str::FromStr for TargetProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TargetProtocol::Http),
            "https" => Ok(TargetProtocol::Https),
            other => Err(format!("unknown protocol {other:?}, expected http or https")),
        }
    }
}

/// Request host filter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostFilterConfig {
    /// Host to match; empty matches everything.
    pub hostname: String,
}

/// Capture source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture from an interface (true) or read `pcap_path` (false).
    pub live: bool,

    /// Interface name for live capture.
    pub interface: String,

    /// BPF filter expression. Empty disables filtering.
    pub filter: String,

    /// Capture file for offline mode.
    pub pcap_path: String,

    /// Bytes captured per frame.
    pub snaplen: i32,

    pub promiscuous: bool,

    /// libpcap read timeout; bounds how long a stop request waits.
    pub read_timeout_ms: i32,

    /// Frames buffered between the capture thread and ingestion.
    pub queue_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            live: true,
            interface: "lo".to_string(),
            filter: "tcp".to_string(),
            pcap_path: String::new(),
            snaplen: 65536,
            promiscuous: false,
            read_timeout_ms: 1000,
            queue_frames: 4096,
        }
    }
}

/// Stream reassembly configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// A flow idle for this long is flushed.
    pub idle_timeout_ms: u64,

    /// Interval of the flush sweep.
    pub flush_interval_ms: u64,

    /// How long a flow whose start was not captured waits before its
    /// lowest held segment is taken as the start.
    pub anchor_after_ms: u64,

    /// Concurrently tracked flow directions.
    pub max_flows: usize,

    /// Out-of-order segments held per flow before a gap is skipped.
    pub max_pending_segments: usize,

    /// Chunks queued per flow between reassembly and framing.
    pub stream_queue_chunks: usize,

    /// How long shutdown waits for flow tasks.
    pub drain_timeout_ms: u64,
}

impl ReassemblyConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn anchor_after(&self) -> Duration {
        Duration::from_millis(self.anchor_after_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 2000,
            flush_interval_ms: 1000,
            anchor_after_ms: 1000,
            max_flows: 65536,
            max_pending_segments: 256,
            stream_queue_chunks: 64,
            drain_timeout_ms: 5000,
        }
    }
}

/// Request framing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FramingConfig {
    pub max_header_bytes: usize,

    pub max_body_bytes: usize,

    /// Consecutive malformed lines tolerated before a stream is abandoned.
    pub max_resync_attempts: u32,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            max_resync_attempts: 32,
        }
    }
}

/// Forwarding pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Concurrent forwarding workers.
    pub workers: usize,

    /// Requests queued ahead of the workers.
    pub queue_capacity: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Idle keep-alive connections kept per upstream host.
    pub pool_max_idle_per_host: usize,
}

impl ForwardingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            workers: 2000,
            queue_capacity: 1,
            request_timeout_secs: 20,
            pool_max_idle_per_host: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: SniffwireConfig = toml::from_str("").unwrap();
        assert_eq!(config.target_port, 80);
        assert_eq!(config.target_protocol, TargetProtocol::Http);
        assert_eq!(config.capture.interface, "lo");
        assert_eq!(config.reassembly.idle_timeout(), Duration::from_secs(2));
        assert_eq!(config.forwarding.workers, 2000);
        assert_eq!(config.forwarding.queue_capacity, 1);
        assert!(!config.append_forwarded_headers);
        assert!(config.append_origin_headers);
        assert!(config.host_filter.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: SniffwireConfig = toml::from_str(
            r#"
            target_protocol = "https"
            target_port = 8443

            [host_filter]
            hostname = "api.example.com"

            [forwarding]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.target_protocol, TargetProtocol::Https);
        assert_eq!(config.target_port, 8443);
        assert_eq!(config.host_filter.unwrap().hostname, "api.example.com");
        assert_eq!(config.forwarding.workers, 8);
        assert_eq!(config.forwarding.request_timeout_secs, 20);
    }
}
