//! Request framing over one reassembled stream.
//!
//! # Responsibilities
//! - Buffer stream chunks until a complete request can be parsed
//! - Resynchronize after malformed input by skipping one line at a time
//! - Drop leftover bytes glued to the front of a request line, as left behind
//!   when a stream is anchored in the middle of a request
//! - Give up on streams that never yield a request
//!
//! # Data Flow
//! ```text
//! FlowStream::next_chunk ──▶ BytesMut ──▶ parser::parse ──▶ ReconstructedRequest
//!                                             │
//!                                             └── Invalid ──▶ skip line (bounded)
//! ```

use std::time::SystemTime;

use bytes::{Buf, BytesMut};

use crate::config::FramingConfig;
use crate::flow::{FlowKey, StreamId};
use crate::http::parser::{self, ParseOutcome};
use crate::http::request::ReconstructedRequest;
use crate::reassembly::FlowStream;

/// Methods a request line is recognized by. WebDAV names that end in a
/// shorter method (`PROPPATCH`, `UNLOCK`) are listed so they are never split.
const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH", "PROPFIND", "PROPPATCH",
    "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK", "REPORT", "SEARCH",
];

/// Length of the junk in front of a known method, for tokens like `xyzGET`.
fn glued_prefix(method: &str) -> Option<usize> {
    if KNOWN_METHODS.contains(&method) {
        return None;
    }
    KNOWN_METHODS
        .iter()
        .filter(|known| method.len() > known.len() && method.ends_with(*known))
        .map(|known| method.len() - known.len())
        .min()
}

pub struct RequestFramer {
    stream: FlowStream,
    buf: BytesMut,
    limits: FramingConfig,
    /// Buffer length below which parsing cannot make progress.
    needed: usize,
    failures: u32,
    abandoned: bool,
    last_timestamp: SystemTime,
}

impl RequestFramer {
    pub fn new(stream: FlowStream, limits: FramingConfig) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            limits,
            needed: 0,
            failures: 0,
            abandoned: false,
            last_timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn key(&self) -> FlowKey {
        self.stream.key()
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream.id()
    }

    /// True once the framer gave up on its stream.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Next complete request, or `None` when the stream ended or was
    /// abandoned. A partial request at end of stream is discarded.
    pub async fn next_request(&mut self) -> Option<ReconstructedRequest> {
        loop {
            if self.abandoned {
                return None;
            }

            if !self.buf.is_empty() && self.buf.len() >= self.needed {
                match parser::parse(&self.buf, &self.limits) {
                    ParseOutcome::Complete(parsed, used) => {
                        if let Some(junk) = glued_prefix(parsed.method.as_str()) {
                            tracing::trace!(stream_id = %self.stream.id(), skipped = junk, "Dropping bytes before request line");
                            self.buf.advance(junk);
                            self.needed = 0;
                            continue;
                        }
                        self.buf.advance(used);
                        self.needed = 0;
                        self.failures = 0;
                        return Some(ReconstructedRequest::new(
                            parsed.method,
                            parsed.target,
                            parsed.version,
                            parsed.headers,
                            parsed.body,
                            self.stream.key(),
                            self.last_timestamp,
                        ));
                    }
                    ParseOutcome::Incomplete { needed } => self.needed = needed,
                    ParseOutcome::Invalid(error) => {
                        self.resync(&error);
                        continue;
                    }
                }
            }

            match self.stream.next_chunk().await {
                Some(chunk) => {
                    self.buf.extend_from_slice(&chunk.data);
                    self.last_timestamp = chunk.timestamp;
                }
                None => {
                    if !self.buf.is_empty() {
                        tracing::debug!(
                            stream_id = %self.stream.id(),
                            flow = %self.stream.key(),
                            discarded = self.buf.len(),
                            "Stream ended inside a request"
                        );
                        self.buf.clear();
                    }
                    return None;
                }
            }
        }
    }

    fn resync(&mut self, error: &parser::ParseError) {
        self.needed = 0;
        self.failures += 1;

        // Server-to-client half of the conversation.
        if self.buf.starts_with(b"HTTP/") {
            tracing::trace!(stream_id = %self.stream.id(), "Response stream, not framing");
            self.abandon();
            return;
        }
        if self.failures >= self.limits.max_resync_attempts {
            tracing::debug!(
                stream_id = %self.stream.id(),
                flow = %self.stream.key(),
                failures = self.failures,
                error = %error,
                "Giving up on unparseable stream"
            );
            self.abandon();
            return;
        }

        tracing::trace!(stream_id = %self.stream.id(), error = %error, "Skipping malformed line");
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(newline) => self.buf.advance(newline + 1),
            None => self.buf.clear(),
        }
    }

    fn abandon(&mut self) {
        self.abandoned = true;
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Endpoint, FlowTracker};
    use crate::reassembly::StreamChunk;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn key() -> FlowKey {
        FlowKey::new(
            Endpoint::from("10.0.0.5:54321".parse::<std::net::SocketAddr>().unwrap()),
            Endpoint::from("10.0.0.1:80".parse::<std::net::SocketAddr>().unwrap()),
        )
    }

    fn framer(limits: FramingConfig) -> (mpsc::Sender<StreamChunk>, RequestFramer) {
        let guard = FlowTracker::new(1).try_track().unwrap();
        let (tx, stream) = FlowStream::channel(key(), guard, 16);
        (tx, RequestFramer::new(stream, limits))
    }

    async fn send(tx: &mpsc::Sender<StreamChunk>, data: &'static [u8]) {
        tx.send(StreamChunk {
            data: Bytes::from_static(data),
            timestamp: SystemTime::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn frames_pipelined_requests_across_chunks() {
        let (tx, mut framer) = framer(FramingConfig::default());
        send(&tx, b"POST /a HTTP/1.1\r\nContent-Le").await;
        send(&tx, b"ngth: 4\r\n\r\nbodyGET /b HTTP/1.1\r\n\r\n").await;
        drop(tx);

        let first = framer.next_request().await.unwrap();
        assert_eq!(first.target(), "/a");
        assert_eq!(&first.body()[..], b"body");
        assert_eq!(first.remote(), "10.0.0.5:54321");

        let second = framer.next_request().await.unwrap();
        assert_eq!(second.target(), "/b");
        assert!(framer.next_request().await.is_none());
    }

    #[tokio::test]
    async fn skips_garbage_before_a_request() {
        let (tx, mut framer) = framer(FramingConfig::default());
        send(&tx, b"\x00\x01junk line\r\nGET /ok HTTP/1.1\r\nHost: h\r\n\r\n").await;
        drop(tx);

        let req = framer.next_request().await.unwrap();
        assert_eq!(req.target(), "/ok");
        assert!(framer.next_request().await.is_none());
    }

    #[tokio::test]
    async fn leftover_bytes_glued_to_request_line_are_dropped() {
        let (tx, mut framer) = framer(FramingConfig::default());
        send(&tx, b"xyzGET /after-anchor HTTP/1.1\r\nHost: h\r\n\r\n").await;
        send(&tx, b"PROPPATCH /dav HTTP/1.1\r\nHost: h\r\n\r\n").await;
        drop(tx);

        let req = framer.next_request().await.unwrap();
        assert_eq!(req.method(), http::Method::GET);
        assert_eq!(req.target(), "/after-anchor");

        let dav = framer.next_request().await.unwrap();
        assert_eq!(dav.method().as_str(), "PROPPATCH");
        assert!(framer.next_request().await.is_none());
    }

    #[test]
    fn glued_prefix_only_splits_unknown_tokens() {
        assert_eq!(glued_prefix("xyzGET"), Some(3));
        assert_eq!(glued_prefix("GET"), None);
        assert_eq!(glued_prefix("UNLOCK"), None);
        assert_eq!(glued_prefix("BREW"), None);
    }

    #[tokio::test]
    async fn stream_without_request_line_yields_nothing() {
        let (tx, mut framer) = framer(FramingConfig::default());
        send(&tx, b"not http at all\nstill not\n").await;
        send(&tx, b"GET /partial HTTP/1.1\r\nHost:").await;
        drop(tx);

        assert!(framer.next_request().await.is_none());
        assert!(!framer.is_abandoned());
    }

    #[tokio::test]
    async fn abandons_after_too_many_failures() {
        let limits = FramingConfig {
            max_resync_attempts: 3,
            ..FramingConfig::default()
        };
        let (tx, mut framer) = framer(limits);
        send(&tx, b"a\nb\nc\nd\nGET / HTTP/1.1\r\n\r\n").await;

        assert!(framer.next_request().await.is_none());
        assert!(framer.is_abandoned());
        drop(tx);
    }

    #[tokio::test]
    async fn response_stream_is_abandoned() {
        let (tx, mut framer) = framer(FramingConfig::default());
        send(&tx, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;

        assert!(framer.next_request().await.is_none());
        assert!(framer.is_abandoned());
        drop(tx);
    }
}
