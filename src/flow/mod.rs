//! Flow demultiplexing subsystem.
//!
//! # Data Flow
//! ```text
//! Frame ──▶ classifier::classify ──▶ (FlowKey, Segment) ──▶ ReassemblyEngine
//!                                           │
//!                                           └── FlowTracker caps live flows
//! ```

pub mod classifier;
pub mod identity;
pub mod segment;
pub mod tracker;

pub use classifier::{classify, ClassifyError};
pub use identity::{Direction, Endpoint, FlowIdentity, FlowKey, Transport};
pub use segment::Segment;
pub use tracker::{FlowGuard, FlowTracker, StreamId};
