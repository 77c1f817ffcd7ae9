//! Passive HTTP request sniffer.
//!
//! Reconstructs HTTP/1.x requests from captured TCP traffic and hands each
//! one to a chain of handlers: a logger, or a proxy that replays the request
//! against a configured target.
//!
//! # Architecture Overview
//!
//! ```text
//!   Interface / pcap file
//!          │
//!          ▼
//!   ┌─────────────┐   Frame    ┌────────────┐  FlowKey + Segment  ┌──────────────┐
//!   │   capture   │──────────▶│    flow    │───────────────────▶│  reassembly  │
//!   │ (pcap thread)│           │ classifier │                     │    engine    │
//!   └─────────────┘            └────────────┘                     └──────┬───────┘
//!                                                                       │ StreamChunk
//!                                                                       ▼
//!   ┌─────────────┐  OutboundRequest  ┌────────────┐  Arc<Request>  ┌──────────────┐
//!   │ forwarding  │◀─────────────────│  handlers  │◀──────────────│ http framer  │
//!   │    pool     │                   │ (dispatch) │                │ (per flow)   │
//!   └─────────────┘                   └────────────┘                └──────────────┘
//!
//!   Cross-cutting: config, lifecycle (signals, shutdown), observability
//! ```

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod flow;
pub mod forwarding;
pub mod handlers;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod reassembly;

pub use config::SniffwireConfig;
pub use dispatch::{Dispatcher, Handler, HandlerError};
pub use lifecycle::Shutdown;
pub use pipeline::Sniffer;
