//! Bounded worker pool replaying requests upstream.
//!
//! # Responsibilities
//! - Own the shared HTTP client and its connection pool
//! - Run a fixed set of workers over a bounded queue
//! - Contain send failures to the request that hit them
//!
//! # Data Flow
//! ```text
//! ProxyHandler ──submit──▶ async_channel (queue_capacity) ──▶ worker × N ──▶ reqwest ──▶ target
//!                  │                                              │
//!                  └── awaits when every worker is busy           └── response body drained, discarded
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ForwardingConfig;
use crate::forwarding::{ForwardError, OutboundRequest};

#[derive(Debug, Default)]
struct PoolCounters {
    forwarded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub forwarded: u64,
    pub failed: u64,
}

pub struct ForwardingPool {
    tx: async_channel::Sender<OutboundRequest>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl ForwardingPool {
    /// Build the client and start the workers.
    pub fn start(config: &ForwardingConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self::with_client(client, config))
    }

    /// Start the workers around an existing client.
    pub fn with_client(client: reqwest::Client, config: &ForwardingConfig) -> Self {
        let (tx, rx) = async_channel::bounded(config.queue_capacity.max(1));
        let counters = Arc::new(PoolCounters::default());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    client.clone(),
                    rx.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            timeout_secs = config.request_timeout_secs,
            "Forwarding pool started"
        );

        Self {
            tx,
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Queue a request. Waits while the queue is full.
    pub async fn submit(&self, request: OutboundRequest) -> Result<(), ForwardError> {
        self.tx.send(request).await.map_err(|_| ForwardError::Closed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop accepting requests and wait for queued and in-flight requests
    /// to finish.
    pub async fn shutdown(&self) {
        self.tx.close();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Forwarding worker panicked");
            }
        }
        let stats = self.stats();
        tracing::info!(
            workers = count,
            forwarded = stats.forwarded,
            failed = stats.failed,
            "Forwarding pool stopped"
        );
    }
}

async fn worker_loop(
    id: usize,
    client: reqwest::Client,
    rx: async_channel::Receiver<OutboundRequest>,
    counters: Arc<PoolCounters>,
) {
    while let Ok(request) = rx.recv().await {
        let request_id = request.request_id;
        let url = request.url.clone();
        match send(&client, request).await {
            Ok(status) => {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sniffwire_forwarded_total", "result" => "ok").increment(1);
                tracing::debug!(worker = id, request_id = %request_id, url = %url, status = status.as_u16(), "Request forwarded");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sniffwire_forwarded_total", "result" => "error").increment(1);
                tracing::warn!(worker = id, request_id = %request_id, url = %url, error = %e, "Forwarding failed");
            }
        }
    }
    tracing::trace!(worker = id, "Forwarding worker exiting");
}

async fn send(client: &reqwest::Client, request: OutboundRequest) -> Result<reqwest::StatusCode, reqwest::Error> {
    let mut headers = reqwest::header::HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        headers.append(name.clone(), value.clone());
    }

    let mut builder = client.request(request.method, request.url.as_str()).headers(headers);
    if !request.body.is_empty() {
        builder = builder.body(request.body);
    }

    let mut response = builder.send().await?;
    let status = response.status();
    // Read the body so the exchange completes; its content is not used.
    while response.chunk().await?.is_some() {}
    Ok(status)
}
