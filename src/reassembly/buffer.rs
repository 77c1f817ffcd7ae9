//! Per-direction reassembly state.
//!
//! Sequence numbers are 32 bit and wrap; the buffer maps them onto a signed
//! 64 bit stream offset relative to its cursor, so ordering inside the
//! pending map never has to reason about wraparound.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use bytes::{Bytes, BytesMut};

use crate::flow::Segment;

/// Lifecycle of one flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Start of stream not known yet; data is held.
    Open,
    /// Anchored, with out-of-order data held past a gap.
    Buffering,
    /// Anchored, nothing held.
    Contiguous,
    /// End of stream reached; accepts nothing more.
    Closed,
}

/// Why a buffer closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Fin,
    Rst,
    Idle,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Fin => "fin",
            CloseReason::Rst => "rst",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Result of feeding the buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Accepted {
    /// Newly contiguous bytes, in stream order.
    pub data: Option<Bytes>,
    /// Set when this step closed the stream.
    pub closed: Option<CloseReason>,
}

#[derive(Debug)]
pub struct FlowBuffer {
    anchored: bool,
    /// Sequence number of the next expected byte, paired with its offset.
    cursor_seq: u32,
    cursor_off: i64,
    pending: BTreeMap<i64, Bytes>,
    fin_off: Option<i64>,
    closed: bool,
    first_seen: SystemTime,
    last_seen: SystemTime,
    max_pending: usize,
}

impl FlowBuffer {
    pub fn new(timestamp: SystemTime, max_pending: usize) -> Self {
        Self {
            anchored: false,
            cursor_seq: 0,
            cursor_off: 0,
            pending: BTreeMap::new(),
            fin_off: None,
            closed: false,
            first_seen: timestamp,
            last_seen: timestamp,
            max_pending: max_pending.max(1),
        }
    }

    pub fn state(&self) -> FlowState {
        if self.closed {
            FlowState::Closed
        } else if !self.anchored {
            FlowState::Open
        } else if self.pending.is_empty() {
            FlowState::Contiguous
        } else {
            FlowState::Buffering
        }
    }

    pub fn last_seen(&self) -> SystemTime {
        self.last_seen
    }

    pub fn first_seen(&self) -> SystemTime {
        self.first_seen
    }

    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Record activity without feeding data.
    pub fn touch(&mut self, timestamp: SystemTime) {
        self.last_seen = self.last_seen.max(timestamp);
    }

    fn offset_of(&self, seq: u32) -> i64 {
        self.cursor_off + i64::from(seq.wrapping_sub(self.cursor_seq) as i32)
    }

    /// Move the cursor to `off`, keeping the sequence number in step.
    fn move_cursor(&mut self, off: i64) {
        self.cursor_seq = self.cursor_seq.wrapping_add((off - self.cursor_off) as u32);
        self.cursor_off = off;
    }

    fn anchor_at(&mut self, off: i64) {
        self.move_cursor(off);
        self.anchored = true;
    }

    /// Feed one segment.
    pub fn accept(&mut self, segment: Segment, timestamp: SystemTime) -> Accepted {
        self.touch(timestamp);
        if self.closed {
            return Accepted::default();
        }

        if segment.rst {
            self.close();
            return Accepted {
                data: None,
                closed: Some(CloseReason::Rst),
            };
        }

        let data_seq = if segment.syn {
            segment.seq.wrapping_add(1)
        } else {
            segment.seq
        };

        if !self.anchored && self.pending.is_empty() && self.fin_off.is_none() {
            // First data seen: use it as the reference point for offsets.
            self.cursor_seq = data_seq;
            self.cursor_off = 0;
        }

        let off = self.offset_of(data_seq);
        if segment.syn && !self.anchored {
            self.anchor_at(off);
        }

        let end = off + segment.payload.len() as i64;
        if !segment.payload.is_empty() && !(self.anchored && end <= self.cursor_off) {
            match self.pending.get(&off) {
                Some(held) if held.len() >= segment.payload.len() => {}
                _ => {
                    self.pending.insert(off, segment.payload);
                }
            }
        }

        if segment.fin {
            self.fin_off = Some(end);
        }

        if !self.anchored {
            if self.pending.len() <= self.max_pending {
                return Accepted::default();
            }
            self.anchor_lowest();
        }

        self.drain()
    }

    fn anchor_lowest(&mut self) {
        let lowest = self
            .pending
            .keys()
            .next()
            .copied()
            .or(self.fin_off)
            .unwrap_or(self.cursor_off);
        self.anchor_at(lowest);
    }

    /// Anchor a buffer that has waited at least `after` for its stream start.
    pub fn anchor_if_waiting(&mut self, now: SystemTime, after: Duration) -> Accepted {
        if self.closed || self.anchored || (self.pending.is_empty() && self.fin_off.is_none()) {
            return Accepted::default();
        }
        let waited = now.duration_since(self.first_seen).unwrap_or(Duration::ZERO);
        if waited < after {
            return Accepted::default();
        }
        self.anchor_lowest();
        self.drain()
    }

    /// Anchor unconditionally if there is anything held, then drain.
    pub fn anchor_now(&mut self) -> Accepted {
        if self.closed || self.anchored || (self.pending.is_empty() && self.fin_off.is_none()) {
            return Accepted::default();
        }
        self.anchor_lowest();
        self.drain()
    }

    /// Emit every byte that is contiguous with the cursor.
    fn drain(&mut self) -> Accepted {
        let mut chunks: Vec<Bytes> = Vec::new();
        loop {
            while let Some(entry) = self.pending.first_entry() {
                let start = *entry.key();
                if start > self.cursor_off {
                    break;
                }
                let payload = entry.remove();
                let end = start + payload.len() as i64;
                if end > self.cursor_off {
                    let skip = (self.cursor_off - start) as usize;
                    chunks.push(payload.slice(skip..));
                    self.move_cursor(end);
                }
            }

            // Too much held behind a gap: give up on the missing bytes.
            if self.pending.len() > self.max_pending {
                if let Some(&lowest) = self.pending.keys().next() {
                    tracing::debug!(
                        gap = lowest - self.cursor_off,
                        held = self.pending.len(),
                        "Skipping reassembly gap"
                    );
                    self.move_cursor(lowest);
                    continue;
                }
            }
            break;
        }

        let mut accepted = Accepted {
            data: coalesce(chunks),
            closed: None,
        };
        if let Some(fin) = self.fin_off {
            if self.cursor_off >= fin {
                self.close();
                accepted.closed = Some(CloseReason::Fin);
            }
        }
        accepted
    }

    /// Discard everything held and stop accepting data.
    pub fn close(&mut self) {
        self.pending.clear();
        self.closed = true;
    }
}

fn coalesce(mut chunks: Vec<Bytes>) -> Option<Bytes> {
    match chunks.len() {
        0 => None,
        1 => chunks.pop(),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut out = BytesMut::with_capacity(total);
            for chunk in &chunks {
                out.extend_from_slice(chunk);
            }
            Some(out.freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn data(accepted: &Accepted) -> &[u8] {
        accepted.data.as_deref().unwrap_or(&[])
    }

    #[test]
    fn in_order_data_flows_through() {
        let mut buf = FlowBuffer::new(now(), 16);
        assert!(data(&buf.accept(Segment::syn(99), now())).is_empty());
        assert_eq!(buf.state(), FlowState::Contiguous);

        assert_eq!(data(&buf.accept(Segment::data(100, "abc"), now())), b"abc");
        assert_eq!(data(&buf.accept(Segment::data(103, "def"), now())), b"def");
    }

    #[test]
    fn later_offset_waits_for_the_gap() {
        let mut buf = FlowBuffer::new(now(), 16);
        buf.accept(Segment::syn(999), now());

        let held = buf.accept(Segment::data(1100, vec![b'b'; 50]), now());
        assert!(held.data.is_none());
        assert_eq!(buf.state(), FlowState::Buffering);

        let out = buf.accept(Segment::data(1000, vec![b'a'; 100]), now());
        let mut expected = vec![b'a'; 100];
        expected.extend(vec![b'b'; 50]);
        assert_eq!(data(&out), &expected[..]);
        assert_eq!(buf.state(), FlowState::Contiguous);
    }

    #[test]
    fn duplicates_and_overlaps_are_trimmed() {
        let mut buf = FlowBuffer::new(now(), 16);
        buf.accept(Segment::syn(0), now());
        assert_eq!(data(&buf.accept(Segment::data(1, "hello"), now())), b"hello");
        assert!(buf.accept(Segment::data(1, "hello"), now()).data.is_none());
        assert_eq!(data(&buf.accept(Segment::data(4, "lo world"), now())), b" world");
    }

    #[test]
    fn sequence_wraparound() {
        let mut buf = FlowBuffer::new(now(), 16);
        buf.accept(Segment::syn(u32::MAX - 2), now());
        buf.accept(Segment::data(0, "cd"), now());
        let out = buf.accept(Segment::data(u32::MAX - 1, "ab"), now());
        assert_eq!(data(&out), b"abcd");
    }

    #[test]
    fn fin_closes_once_cursor_reaches_it() {
        let mut buf = FlowBuffer::new(now(), 16);
        buf.accept(Segment::syn(0), now());
        let early = buf.accept(Segment::data(4, "def").with_fin(), now());
        assert!(early.closed.is_none());

        let out = buf.accept(Segment::data(1, "abc"), now());
        assert_eq!(data(&out), b"abcdef");
        assert_eq!(out.closed, Some(CloseReason::Fin));
        assert_eq!(buf.state(), FlowState::Closed);
        assert!(buf.accept(Segment::data(7, "x"), now()).data.is_none());
    }

    #[test]
    fn rst_closes_immediately() {
        let mut buf = FlowBuffer::new(now(), 16);
        buf.accept(Segment::syn(0), now());
        buf.accept(Segment::data(10, "later"), now());
        let out = buf.accept(Segment::data(1, "").with_rst(), now());
        assert_eq!(out.closed, Some(CloseReason::Rst));
        assert_eq!(buf.pending_segments(), 0);
    }

    #[test]
    fn mid_stream_flow_anchors_after_waiting() {
        let start = now();
        let mut buf = FlowBuffer::new(start, 16);
        buf.accept(Segment::data(5000, "world"), start);
        buf.accept(Segment::data(4995, "hello"), start);
        assert_eq!(buf.state(), FlowState::Open);

        let early = buf.anchor_if_waiting(start + Duration::from_millis(10), Duration::from_secs(1));
        assert!(early.data.is_none());

        let out = buf.anchor_if_waiting(start + Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(data(&out), b"helloworld");
        assert_eq!(buf.state(), FlowState::Contiguous);
    }

    #[test]
    fn pending_limit_anchors_and_skips_gaps() {
        let mut buf = FlowBuffer::new(now(), 2);
        buf.accept(Segment::data(10, "a"), now());
        buf.accept(Segment::data(20, "b"), now());
        // Third held segment exceeds the limit: anchor at the lowest offset.
        let out = buf.accept(Segment::data(30, "c"), now());
        assert_eq!(data(&out), b"a");
        assert_eq!(buf.state(), FlowState::Buffering);
        // Over the limit again while anchored: the gap before "b" is skipped.
        let out = buf.accept(Segment::data(40, "d"), now());
        assert_eq!(data(&out), b"b");

        let mut anchored = FlowBuffer::new(now(), 2);
        anchored.accept(Segment::syn(0), now());
        anchored.accept(Segment::data(10, "x"), now());
        anchored.accept(Segment::data(20, "y"), now());
        let out = anchored.accept(Segment::data(30, "z"), now());
        assert_eq!(data(&out), b"x");
        assert_eq!(anchored.pending_segments(), 2);
    }
}
