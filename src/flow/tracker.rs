//! Flow lifecycle tracking.
//!
//! # Responsibilities
//! - Cap the number of concurrently tracked flow directions
//! - Hand out unique stream IDs for tracing
//! - Let the pipeline wait for flow tasks to drain on shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Relaxed ordering is enough; IDs only need to be unique.
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one reassembled byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn new() -> Self {
        Self(STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Counts live flow directions and enforces `max_flows`.
///
/// A slot is held from the moment the engine creates a buffer until the
/// framer task consuming that stream finishes, so a slow consumer keeps its
/// slot even after the buffer itself was flushed.
#[derive(Debug, Clone)]
pub struct FlowTracker {
    active_count: Arc<AtomicU64>,
    limit: Arc<Semaphore>,
    max_flows: usize,
}

impl FlowTracker {
    pub fn new(max_flows: usize) -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            limit: Arc::new(Semaphore::new(max_flows)),
            max_flows,
        }
    }

    /// Claim a slot for a new flow direction. Returns `None` at the limit;
    /// capture never waits for a slot.
    pub fn try_track(&self) -> Option<FlowGuard> {
        let permit = Arc::clone(&self.limit).try_acquire_owned().ok()?;
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("sniffwire_active_flows").set(active as f64);
        Some(FlowGuard {
            active_count: Arc::clone(&self.active_count),
            id: StreamId::new(),
            _permit: permit,
        })
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn max_flows(&self) -> usize {
        self.max_flows
    }

    /// Wait until every guard is dropped or `timeout` elapses.
    /// Returns `true` when all flows drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Slot of one tracked flow direction. Released on drop.
#[derive(Debug)]
pub struct FlowGuard {
    active_count: Arc<AtomicU64>,
    id: StreamId,
    _permit: OwnedSemaphorePermit,
}

impl FlowGuard {
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("sniffwire_active_flows").set(active as f64);
        tracing::trace!(stream_id = %self.id, "Flow released");
    }
}
