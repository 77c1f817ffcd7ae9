//! TCP segments as seen by the reassembly engine.

use bytes::Bytes;

/// Ordered transport payload chunk of one flow direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Sequence number of the first payload byte (or of the SYN).
    pub seq: u32,
    pub payload: Bytes,
    /// Start of stream; consumes one sequence number before the payload.
    pub syn: bool,
    /// Orderly end of stream after the payload.
    pub fin: bool,
    /// Abortive end of stream.
    pub rst: bool,
}

impl Segment {
    /// A plain data segment.
    pub fn data(seq: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
            syn: false,
            fin: false,
            rst: false,
        }
    }

    pub fn syn(seq: u32) -> Self {
        Self {
            syn: true,
            ..Self::data(seq, Bytes::new())
        }
    }

    pub fn with_fin(mut self) -> Self {
        self.fin = true;
        self
    }

    pub fn with_rst(mut self) -> Self {
        self.rst = true;
        self
    }

    /// A bare ACK or window update carries nothing the engine needs.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && !self.syn && !self.fin && !self.rst
    }

    /// Whether this segment may create a new stream. Trailing FINs, RSTs and
    /// ACKs of a stream that is already gone must not resurrect it.
    pub fn opens_stream(&self) -> bool {
        !self.rst && (self.syn || !self.payload.is_empty())
    }
}
