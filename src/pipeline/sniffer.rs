//! The sniffing pipeline.
//!
//! # Responsibilities
//! - Read frames in order and feed them through classification into the
//!   reassembly engine
//! - Run the periodic flush sweep
//! - Spawn one framing task per flow direction and dispatch its requests
//! - Stop everything on shutdown or on the first handler failure
//!
//! # Data Flow
//! ```text
//! frames (mpsc) ──▶ ingestion loop ──▶ classify ──▶ ReassemblyEngine ──▶ FlowStream
//!                        ▲                               ▲                   │
//!                  stop token                      sweeper task       flow task (per stream)
//!                                                                  RequestFramer ──▶ Dispatcher
//! ```
//!
//! # Design Decisions
//! - Two tokens: `stop` ends ingestion and the sweeper, `abort` is what
//!   handlers see and fires only on failure or when draining times out, so
//!   requests already framed at shutdown are still delivered
//! - The first dispatch error wins; later errors are consequences of it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::capture::Frame;
use crate::config::{FramingConfig, ReassemblyConfig, SniffwireConfig};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::flow::{classify, FlowTracker};
use crate::http::RequestFramer;
use crate::pipeline::PipelineError;
use crate::reassembly::{FlowStream, ReassemblyEngine, StreamFactory};

/// Time source the sweeper compares flow activity against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall clock; for live captures.
    Wall,
    /// Latest capture timestamp seen; for replaying capture files.
    Capture,
}

#[derive(Debug)]
struct Clock {
    mode: ClockMode,
    /// Nanoseconds since the epoch of the latest frame.
    latest: AtomicU64,
}

impl Clock {
    fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            latest: AtomicU64::new(0),
        }
    }

    fn observe(&self, timestamp: SystemTime) {
        if let Ok(since) = timestamp.duration_since(SystemTime::UNIX_EPOCH) {
            let nanos = u64::try_from(since.as_nanos()).unwrap_or(u64::MAX);
            self.latest.fetch_max(nanos, Ordering::Relaxed);
        }
    }

    fn now(&self) -> SystemTime {
        match self.mode {
            ClockMode::Wall => SystemTime::now(),
            ClockMode::Capture => {
                SystemTime::UNIX_EPOCH + Duration::from_nanos(self.latest.load(Ordering::Relaxed))
            }
        }
    }
}

/// Counters reported when the pipeline finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub unclassified: u64,
    pub requests: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    unclassified: AtomicU64,
    requests: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames: self.frames.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Spawns the framing task of every new stream.
#[derive(Clone)]
struct FlowSpawner {
    dispatcher: Arc<Dispatcher>,
    framing: FramingConfig,
    stop: CancellationToken,
    abort: CancellationToken,
    failure: Arc<Mutex<Option<DispatchError>>>,
    counters: Arc<Counters>,
}

impl FlowSpawner {
    fn record_failure(&self, error: DispatchError) {
        if self.abort.is_cancelled() {
            return;
        }
        if let Ok(mut slot) = self.failure.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.abort.cancel();
        self.stop.cancel();
    }

    async fn run_flow(self, stream: FlowStream) {
        let mut framer = RequestFramer::new(stream, self.framing.clone());
        while let Some(request) = framer.next_request().await {
            if self.abort.is_cancelled() {
                break;
            }
            self.counters.requests.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                stream_id = %framer.stream_id(),
                request_id = %request.id(),
                method = %request.method(),
                "Request framed"
            );
            if let Err(e) = self.dispatcher.dispatch(&self.abort, Arc::new(request)).await {
                self.record_failure(e);
                break;
            }
        }
    }
}

impl StreamFactory for FlowSpawner {
    fn new_stream(&self, stream: FlowStream) {
        tokio::spawn(self.clone().run_flow(stream));
    }
}

pub struct Sniffer {
    dispatcher: Arc<Dispatcher>,
    reassembly: ReassemblyConfig,
    framing: FramingConfig,
    clock: ClockMode,
}

impl Sniffer {
    /// A pipeline for `config`. Live captures use the wall clock, capture
    /// files their own timestamps.
    pub fn new(config: &SniffwireConfig, dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            reassembly: config.reassembly.clone(),
            framing: config.framing.clone(),
            clock: if config.capture.live {
                ClockMode::Wall
            } else {
                ClockMode::Capture
            },
        }
    }

    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Consume `frames` until the channel closes or `shutdown` fires. Returns
    /// the first handler failure, if any.
    pub async fn run(
        self,
        mut frames: mpsc::Receiver<Frame>,
        shutdown: CancellationToken,
    ) -> Result<PipelineStats, PipelineError> {
        let stop = shutdown.child_token();
        let abort = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let counters = Arc::new(Counters::default());
        let clock = Arc::new(Clock::new(self.clock));

        let spawner = FlowSpawner {
            dispatcher: Arc::clone(&self.dispatcher),
            framing: self.framing.clone(),
            stop: stop.clone(),
            abort: abort.clone(),
            failure: Arc::clone(&failure),
            counters: Arc::clone(&counters),
        };
        let tracker = FlowTracker::new(self.reassembly.max_flows);
        let engine = Arc::new(ReassemblyEngine::new(
            &self.reassembly,
            tracker.clone(),
            Arc::new(spawner),
        ));

        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&engine),
            Arc::clone(&clock),
            self.reassembly.flush_interval(),
            stop.clone(),
        ));

        tracing::info!(
            handlers = self.dispatcher.len(),
            clock = ?self.clock,
            max_flows = self.reassembly.max_flows,
            "Sniffer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tracing::info!("Sniffer stopping");
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => ingest(&engine, &clock, &counters, frame).await,
                    None => {
                        tracing::info!("Capture ended");
                        break;
                    }
                },
            }
        }

        stop.cancel();
        if let Err(e) = sweeper.await {
            tracing::error!(error = %e, "Sweeper task panicked");
        }

        let closed = engine.close_all().await;
        tracing::debug!(flows = closed, "Remaining flows closed");

        let drain_timeout = self.reassembly.drain_timeout();
        if !tracker.wait_for_drain(drain_timeout).await {
            tracing::warn!(
                remaining = tracker.active_count(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Flow tasks did not drain in time, aborting"
            );
            abort.cancel();
        }

        let stats = counters.snapshot();
        let failed = failure.lock().ok().and_then(|mut slot| slot.take());
        match failed {
            Some(error) => Err(PipelineError::Handler(error)),
            None => {
                tracing::info!(
                    frames = stats.frames,
                    unclassified = stats.unclassified,
                    requests = stats.requests,
                    "Sniffer finished"
                );
                Ok(stats)
            }
        }
    }
}

async fn ingest(engine: &ReassemblyEngine, clock: &Clock, counters: &Counters, frame: Frame) {
    counters.frames.fetch_add(1, Ordering::Relaxed);
    match classify(&frame) {
        Ok((key, segment)) => {
            metrics::counter!("sniffwire_frames_total", "outcome" => "tcp").increment(1);
            clock.observe(frame.timestamp);
            engine.assemble_with_timestamp(key, segment, frame.timestamp).await;
        }
        Err(e) => {
            counters.unclassified.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sniffwire_frames_total", "outcome" => e.label()).increment(1);
            tracing::trace!(error = %e, bytes = frame.data.len(), "Frame dropped");
        }
    }
}

async fn sweep_loop(engine: Arc<ReassemblyEngine>, clock: Arc<Clock>, every: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let flushed = engine.sweep(clock.now());
                if flushed > 0 {
                    tracing::debug!(flushed, active = engine.flow_count(), "Idle flows flushed");
                }
            }
        }
    }
}
