//! End-to-end tests: captured frames in, reconstructed requests out.

use std::time::SystemTime;

use bytes::Bytes;
use http::Method;
use sniffwire::capture::Frame;
use sniffwire::dispatch::Dispatcher;
use sniffwire::pipeline::{ClockMode, PipelineError};
use sniffwire::{Sniffer, SniffwireConfig};
use tokio_util::sync::CancellationToken;

mod common;
use common::Conversation;

const ISN: u32 = 1000;

fn sniffer(dispatcher: Dispatcher) -> Sniffer {
    Sniffer::new(&SniffwireConfig::default(), dispatcher).with_clock(ClockMode::Capture)
}

#[tokio::test]
async fn test_out_of_order_segments_rebuild_request() {
    let raw = b"POST /submit?x=1 HTTP/1.1\r\nHost: api.example.com\r\nContent-Length: 11\r\n\r\nhello world";
    let (first, rest) = raw.split_at(20);
    let (second, third) = rest.split_at(30);

    let mut conn = Conversation::new(54321);
    let start = ISN + 1;
    let frames = vec![
        conn.client_syn(ISN),
        conn.client_data(start + 50, third),
        conn.client_data(start, first),
        // Retransmission of the first segment.
        conn.client_data(start, first),
        conn.client_data(start + 20, second),
        conn.client_fin(start + raw.len() as u32),
    ];

    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(common::replay(frames), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.frames, 6);
    assert_eq!(stats.requests, 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.method(), Method::POST);
    assert_eq!(request.target(), "/submit?x=1");
    assert_eq!(request.host(), Some("api.example.com"));
    assert_eq!(request.body(), Bytes::from_static(b"hello world"));
    assert_eq!(request.remote(), conn.client_addr());
}

#[tokio::test]
async fn test_pipelined_requests_on_separate_connections() {
    let mut a = Conversation::new(40000);
    let mut b = Conversation::new(40001);
    let two = b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\n\r\n";
    let one = b"DELETE /item/7 HTTP/1.1\r\nHost: b\r\n\r\n";

    let frames = vec![
        a.client_syn(ISN),
        b.client_syn(ISN),
        b.client_data(ISN + 1, one),
        a.client_data(ISN + 1, two),
    ];

    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(common::replay(frames), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.requests, 3);

    let seen = seen.lock().unwrap();
    let mut targets: Vec<&str> = seen.iter().map(|r| r.target()).collect();
    targets.sort_unstable();
    assert_eq!(targets, ["/item/7", "/one", "/two"]);

    // Per-flow order is preserved.
    let flow_a: Vec<&str> = seen
        .iter()
        .filter(|r| r.remote() == a.client_addr())
        .map(|r| r.target())
        .collect();
    assert_eq!(flow_a, ["/one", "/two"]);
}

#[tokio::test]
async fn test_stream_without_request_line_invokes_nothing() {
    let mut conn = Conversation::new(50000);
    let frames = vec![
        conn.client_syn(ISN),
        conn.client_data(ISN + 1, b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03 not http at all\r\n"),
    ];

    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(common::replay(frames), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.requests, 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_responses_are_not_requests() {
    let mut conn = Conversation::new(50001);
    let frames = vec![
        conn.client_syn(ISN),
        conn.client_data(ISN + 1, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"),
        conn.server_data(5000, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
    ];

    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(common::replay(frames), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.requests, 1);
    assert_eq!(seen.lock().unwrap()[0].target(), "/");
}

#[tokio::test]
async fn test_unclassifiable_frames_are_counted_and_skipped() {
    let mut conn = Conversation::new(50002);
    let frames = vec![
        Frame::ethernet(vec![0u8; 7], SystemTime::now()),
        conn.client_syn(ISN),
        conn.client_data(ISN + 1, b"GET /ok HTTP/1.1\r\nHost: a\r\n\r\n"),
    ];

    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(common::replay(frames), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.frames, 3);
    assert_eq!(stats.unclassified, 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_handler_failure_stops_pipeline() {
    let mut conn = Conversation::new(50003);
    let frames = vec![
        conn.client_syn(ISN),
        conn.client_data(ISN + 1, b"GET /boom HTTP/1.1\r\nHost: a\r\n\r\n"),
    ];

    let (after, seen) = common::recorder();
    let dispatcher = Dispatcher::new()
        .with_handler(common::failing("gatekeeper"))
        .with_handler(after);
    let result = sniffer(dispatcher)
        .run(common::replay(frames), CancellationToken::new())
        .await;

    match result {
        Err(PipelineError::Handler(e)) => assert_eq!(e.handler, "gatekeeper"),
        other => panic!("expected handler failure, got {other:?}"),
    }
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_before_frames_returns_cleanly() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let (_tx, rx) = tokio::sync::mpsc::channel::<Frame>(1);
    let (handler, seen) = common::recorder();
    let stats = sniffer(Dispatcher::new().with_handler(handler))
        .run(rx, shutdown)
        .await
        .unwrap();

    assert_eq!(stats.frames, 0);
    assert!(seen.lock().unwrap().is_empty());
}
