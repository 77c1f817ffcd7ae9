//! TCP stream reassembly.

pub mod buffer;
pub mod engine;

pub use buffer::{CloseReason, FlowBuffer, FlowState};
pub use engine::{FlowStream, ReassemblyEngine, StreamFactory};

use std::time::SystemTime;

use bytes::Bytes;

/// Contiguous bytes of one flow direction.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub data: Bytes,
    /// Capture time of the frame that completed these bytes.
    pub timestamp: SystemTime,
}
