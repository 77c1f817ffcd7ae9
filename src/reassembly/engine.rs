//! Reassembly engine.
//!
//! # Responsibilities
//! - Route segments to the buffer of their flow direction
//! - Hand contiguous bytes to the stream consumer of that direction
//! - Anchor mid-stream flows and evict idle ones on sweep
//!
//! # Data Flow
//! ```text
//! assemble_with_timestamp(key, segment)
//!        │
//!        ├── new key ──▶ FlowTracker slot ──▶ StreamFactory::new_stream(FlowStream)
//!        ▼
//!   FlowEntry (Mutex) ──▶ FlowBuffer::accept ──▶ mpsc ──▶ FlowStream::next_chunk
//!
//! sweep(now) ──▶ anchor waiting flows ──▶ flush_older_than(now - idle_timeout)
//! ```
//!
//! # Design Decisions
//! - Each entry has its own async mutex; the map lock is only held to look
//!   an entry up, never across an await
//! - Chunks are sent while the entry lock is held, which keeps a
//!   direction's chunks in order; a full stream channel therefore stalls
//!   ingestion, which is how forwarding backpressure reaches capture
//! - Sweeps use `try_lock` and skip flows that are busy
//! - A flow closed by FIN or RST stays in the map as a tombstone until it
//!   goes idle, so retransmissions after close do not start a new stream

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use crate::config::ReassemblyConfig;
use crate::flow::{FlowGuard, FlowKey, FlowTracker, Segment, StreamId};
use crate::reassembly::buffer::{Accepted, CloseReason, FlowBuffer, FlowState};
use crate::reassembly::StreamChunk;

/// Receives every newly opened stream. The pipeline spawns a framer task
/// per stream from here.
pub trait StreamFactory: Send + Sync {
    fn new_stream(&self, stream: FlowStream);
}

/// Consumer half of one reassembled flow direction.
///
/// Holds the flow's tracker slot; dropping it releases the slot and tells
/// the engine to discard further data for this stream.
#[derive(Debug)]
pub struct FlowStream {
    key: FlowKey,
    rx: mpsc::Receiver<StreamChunk>,
    guard: FlowGuard,
}

impl FlowStream {
    /// A stream for `key` and the sender that feeds it.
    pub fn channel(key: FlowKey, guard: FlowGuard, capacity: usize) -> (mpsc::Sender<StreamChunk>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { key, rx, guard })
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn id(&self) -> StreamId {
        self.guard.id()
    }

    /// Next contiguous chunk, or `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct FlowEntry {
    id: StreamId,
    buffer: FlowBuffer,
    /// `None` once end of stream was signalled or the consumer went away.
    sink: Option<mpsc::Sender<StreamChunk>>,
}

impl FlowEntry {
    /// Deliver an accept result; returns the close reason if the stream ended.
    async fn deliver(&mut self, accepted: Accepted, timestamp: SystemTime) -> Option<CloseReason> {
        if let (Some(data), Some(sink)) = (accepted.data, self.sink.as_ref()) {
            if sink.send(StreamChunk { data, timestamp }).await.is_err() {
                tracing::debug!(stream_id = %self.id, "Stream consumer gone, discarding flow data");
                self.sink = None;
            }
        }
        self.finish(accepted.closed)
    }

    /// Non-blocking delivery for sweeps. Only used for flows that were never
    /// anchored, whose channel has not carried a chunk yet.
    fn try_deliver(&mut self, accepted: Accepted, timestamp: SystemTime) -> Option<CloseReason> {
        if let (Some(data), Some(sink)) = (accepted.data, self.sink.as_ref()) {
            if sink.try_send(StreamChunk { data, timestamp }).is_err() {
                self.sink = None;
            }
        }
        self.finish(accepted.closed)
    }

    fn finish(&mut self, closed: Option<CloseReason>) -> Option<CloseReason> {
        if closed.is_some() {
            // Dropping the sender is the end-of-stream signal.
            self.sink = None;
        }
        closed
    }

    fn is_dead(&self) -> bool {
        self.sink.is_none() || self.buffer.state() == FlowState::Closed
    }
}

type SharedEntry = Arc<Mutex<FlowEntry>>;

pub struct ReassemblyEngine {
    flows: DashMap<FlowKey, SharedEntry>,
    tracker: FlowTracker,
    factory: Arc<dyn StreamFactory>,
    max_pending: usize,
    stream_queue: usize,
    idle_timeout: Duration,
    anchor_after: Duration,
}

impl ReassemblyEngine {
    pub fn new(config: &ReassemblyConfig, tracker: FlowTracker, factory: Arc<dyn StreamFactory>) -> Self {
        Self {
            flows: DashMap::new(),
            tracker,
            factory,
            max_pending: config.max_pending_segments,
            stream_queue: config.stream_queue_chunks.max(1),
            idle_timeout: config.idle_timeout(),
            anchor_after: config.anchor_after(),
        }
    }

    /// Number of buffers currently held, tombstones included.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    /// Feed one segment captured at `timestamp`.
    pub async fn assemble_with_timestamp(&self, key: FlowKey, segment: Segment, timestamp: SystemTime) {
        if segment.is_empty() {
            return;
        }

        let Some(entry) = self.entry_for(key, &segment, timestamp) else {
            return;
        };
        self.assemble_into(key, entry, segment, timestamp).await;
    }

    /// A sweep may flush `entry` between the lookup and the lock below.
    async fn assemble_into(&self, key: FlowKey, entry: SharedEntry, segment: Segment, timestamp: SystemTime) {
        let mut flow = entry.lock().await;

        if flow.is_dead() {
            // A SYN replaces a tombstone (port reuse). Other stream openers
            // only start over when the entry was already flushed out of the map.
            let reopen = segment.syn || (segment.opens_stream() && !self.is_current(&key, &entry));
            if !reopen {
                flow.buffer.touch(timestamp);
                return;
            }
            drop(flow);
            self.flows.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
            let Some(fresh) = self.entry_for(key, &segment, timestamp) else {
                return;
            };
            let mut flow = fresh.lock().await;
            self.feed(&key, &mut flow, segment, timestamp).await;
            return;
        }

        self.feed(&key, &mut flow, segment, timestamp).await;
    }

    fn is_current(&self, key: &FlowKey, entry: &SharedEntry) -> bool {
        self.flows.get(key).is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    async fn feed(&self, key: &FlowKey, flow: &mut FlowEntry, segment: Segment, timestamp: SystemTime) {
        let accepted = flow.buffer.accept(segment, timestamp);
        if let Some(reason) = flow.deliver(accepted, timestamp).await {
            record_close(key, flow.id, reason);
        }
    }

    /// Look up the entry for `key`, creating it if the segment may open a
    /// stream and a flow slot is free.
    fn entry_for(&self, key: FlowKey, segment: &Segment, timestamp: SystemTime) -> Option<SharedEntry> {
        if let Some(existing) = self.flows.get(&key) {
            return Some(Arc::clone(existing.value()));
        }
        if !segment.opens_stream() {
            return None;
        }

        let Some(guard) = self.tracker.try_track() else {
            metrics::counter!("sniffwire_flows_rejected_total").increment(1);
            tracing::debug!(flow = %key, max_flows = self.tracker.max_flows(), "Flow limit reached, dropping segment");
            return None;
        };

        let id = guard.id();
        let (tx, stream) = FlowStream::channel(key, guard, self.stream_queue);
        let entry = match self.flows.entry(key) {
            Entry::Occupied(existing) => return Some(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(Mutex::new(FlowEntry {
                    id,
                    buffer: FlowBuffer::new(timestamp, self.max_pending),
                    sink: Some(tx),
                }));
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };

        metrics::counter!("sniffwire_flows_opened_total").increment(1);
        tracing::debug!(flow = %key, stream_id = %id, syn = segment.syn, "Flow opened");
        self.factory.new_stream(stream);
        Some(entry)
    }

    /// Periodic maintenance: anchor flows that have waited long enough for
    /// their stream start, then flush flows idle past the timeout.
    pub fn sweep(&self, now: SystemTime) -> usize {
        self.anchor_waiting(now);
        match now.checked_sub(self.idle_timeout) {
            Some(threshold) => self.flush_older_than(threshold),
            None => 0,
        }
    }

    fn anchor_waiting(&self, now: SystemTime) {
        for (key, entry) in self.snapshot() {
            let Ok(mut flow) = entry.try_lock() else {
                continue;
            };
            if flow.is_dead() || flow.buffer.state() != FlowState::Open {
                continue;
            }
            let accepted = flow.buffer.anchor_if_waiting(now, self.anchor_after);
            if accepted.data.is_some() {
                tracing::debug!(flow = %key, stream_id = %flow.id, "Anchored mid-stream flow");
            }
            let ts = flow.buffer.last_seen();
            if let Some(reason) = flow.try_deliver(accepted, ts) {
                record_close(&key, flow.id, reason);
            }
        }
    }

    /// Flush every flow whose last activity is older than `threshold`.
    /// Held segments are discarded, end of stream is signalled once and the
    /// buffer is destroyed. Busy flows are skipped until the next sweep.
    pub fn flush_older_than(&self, threshold: SystemTime) -> usize {
        let mut flushed = 0;
        for (key, entry) in self.snapshot() {
            let Ok(mut flow) = entry.try_lock() else {
                continue;
            };
            if flow.buffer.last_seen() >= threshold {
                continue;
            }
            let was_live = !flow.is_dead();
            flow.buffer.close();
            flow.sink = None;
            if was_live {
                record_close(&key, flow.id, CloseReason::Idle);
            }
            drop(flow);
            self.flows.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
            flushed += 1;
        }
        flushed
    }

    /// Close every flow. Flows still waiting for their stream start are
    /// anchored first so what they hold reaches the framer.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for (key, entry) in self.snapshot() {
            let mut flow = entry.lock().await;
            if !flow.is_dead() {
                let accepted = flow.buffer.anchor_now();
                let ts = flow.buffer.last_seen();
                let reason = flow.deliver(accepted, ts).await;
                flow.buffer.close();
                flow.sink = None;
                record_close(&key, flow.id, reason.unwrap_or(CloseReason::Shutdown));
                closed += 1;
            }
            drop(flow);
            self.flows.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
        }
        closed
    }

    fn snapshot(&self) -> Vec<(FlowKey, SharedEntry)> {
        self.flows
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }
}

fn record_close(key: &FlowKey, id: StreamId, reason: CloseReason) {
    metrics::counter!("sniffwire_flows_closed_total", "reason" => reason.as_str()).increment(1);
    tracing::debug!(flow = %key, stream_id = %id, reason = reason.as_str(), "Flow closed");
}
