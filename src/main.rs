//! sniffwire command line.
//!
//! ```text
//! sniffwire [--config FILE] [-i IFACE] [-f BPF] sniff log|proxy [...]
//! sniffwire [--config FILE] [-f BPF] pcap --pcap-path FILE log|proxy [...]
//! ```
//!
//! File configuration is loaded first, flags override it, then the result is
//! validated as a whole.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use sniffwire::capture::CaptureSource;
use sniffwire::config::{resolve_config, validate_config, ConfigError, HostFilterConfig, TargetProtocol};
use sniffwire::dispatch::Dispatcher;
use sniffwire::forwarding::ForwardingPool;
use sniffwire::handlers::{LogHandler, ProxyHandler};
use sniffwire::lifecycle::{spawn_signal_handler, Shutdown};
use sniffwire::observability::{init_logging, init_metrics};
use sniffwire::{Sniffer, SniffwireConfig};

#[derive(Debug, Parser)]
#[command(name = "sniffwire", version, about = "Reconstruct and replay HTTP requests from captured traffic")]
struct Cli {
    /// Configuration file (defaults to $HOME/.sniffwire.toml when present)
    #[arg(long, global = true, env = "SNIFFWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to capture on
    #[arg(short = 'i', long, global = true)]
    interface: Option<String>,

    /// BPF filter expression
    #[arg(short = 'f', long = "bpf-filter", global = true)]
    bpf_filter: Option<String>,

    #[command(subcommand)]
    source: Source,
}

#[derive(Debug, Subcommand)]
enum Source {
    /// Capture live traffic from an interface
    Sniff {
        #[command(subcommand)]
        mode: Mode,
    },
    /// Read traffic from a capture file
    Pcap {
        #[arg(long)]
        pcap_path: PathBuf,

        #[command(subcommand)]
        mode: Mode,
    },
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Log every reconstructed request
    Log,
    /// Replay every reconstructed request against a target
    Proxy(ProxyArgs),
}

#[derive(Debug, Args)]
struct ProxyArgs {
    #[arg(long)]
    target_host: Option<String>,

    #[arg(long)]
    target_port: Option<u16>,

    #[arg(long)]
    target_protocol: Option<TargetProtocol>,

    /// Append X-Forwarded-For / X-Forwarded-Port
    #[arg(long)]
    append_xff: bool,

    /// Add Sniffwire-Connecting-Ip / Sniffwire-Connecting-Port (on by default)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    enable_origin_headers: Option<bool>,

    /// Only forward requests for this host
    #[arg(long)]
    app_filter_hostname: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<SniffwireConfig, ConfigError> {
        let mut config = resolve_config(self.config.as_deref())?;
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(&self, config: &mut SniffwireConfig) {
        if let Some(interface) = &self.interface {
            config.capture.interface = interface.clone();
        }
        if let Some(filter) = &self.bpf_filter {
            config.capture.filter = filter.clone();
        }

        let mode = match &self.source {
            Source::Sniff { mode } => {
                config.capture.live = true;
                mode
            }
            Source::Pcap { pcap_path, mode } => {
                config.capture.live = false;
                config.capture.pcap_path = pcap_path.display().to_string();
                mode
            }
        };

        if let Mode::Proxy(args) = mode {
            args.apply(config);
        }
    }

    fn proxy(&self) -> bool {
        let mode = match &self.source {
            Source::Sniff { mode } | Source::Pcap { mode, .. } => mode,
        };
        matches!(mode, Mode::Proxy(_))
    }
}

impl ProxyArgs {
    fn apply(&self, config: &mut SniffwireConfig) {
        if let Some(host) = &self.target_host {
            config.target_host = host.clone();
        }
        if let Some(port) = self.target_port {
            config.target_port = port;
        }
        if let Some(protocol) = self.target_protocol {
            config.target_protocol = protocol;
        }
        if self.append_xff {
            config.append_forwarded_headers = true;
        }
        if let Some(origin) = self.enable_origin_headers {
            config.append_origin_headers = origin;
        }
        if let Some(hostname) = &self.app_filter_hostname {
            config.host_filter = Some(HostFilterConfig {
                hostname: hostname.clone(),
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    init_logging(&config.observability)?;
    init_metrics(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sniffwire starting");

    let source = CaptureSource::open(&config.capture)?;

    let mut dispatcher = Dispatcher::new();
    let pool = if cli.proxy() {
        let pool = Arc::new(ForwardingPool::start(&config.forwarding)?);
        let handler = ProxyHandler::from_config(Arc::clone(&pool), &config);
        tracing::info!(
            upstream = %handler.target().base_url(),
            forwarded_headers = config.append_forwarded_headers,
            origin_headers = config.append_origin_headers,
            workers = config.forwarding.workers,
            "Proxy mode"
        );
        dispatcher.register(Arc::new(handler));
        Some(pool)
    } else {
        dispatcher.register(Arc::new(LogHandler::new()));
        None
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let (frames, capture) = source.start()?;
    let result = Sniffer::new(&config, dispatcher)
        .run(frames, shutdown.token())
        .await;

    capture.stop();
    match tokio::task::spawn_blocking(move || capture.join()).await {
        Ok(Ok(frames)) => tracing::info!(frames, "Capture stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Capture failed"),
        Err(e) => tracing::error!(error = %e, "Capture join failed"),
    }

    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    let stats = result?;
    tracing::info!(
        frames = stats.frames,
        unclassified = stats.unclassified,
        requests = stats.requests,
        "Shutdown complete"
    );
    Ok(())
}
