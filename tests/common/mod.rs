//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use etherparse::PacketBuilder;
use sniffwire::capture::Frame;
use sniffwire::dispatch::{handler_fn, Handler, HandlerError};
use sniffwire::http::ReconstructedRequest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

pub const CLIENT_IP: [u8; 4] = [10, 0, 0, 5];
pub const SERVER_IP: [u8; 4] = [10, 0, 0, 1];
pub const SERVER_PORT: u16 = 80;

/// One captured TCP connection. Every frame is stamped 1ms after the
/// previous one.
pub struct Conversation {
    client_port: u16,
    clock: SystemTime,
}

impl Conversation {
    pub fn new(client_port: u16) -> Self {
        Self {
            client_port,
            clock: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    fn stamp(&mut self) -> SystemTime {
        self.clock += Duration::from_millis(1);
        self.clock
    }

    fn client(&self, seq: u32) -> etherparse::PacketBuilderStep<etherparse::TcpHeader> {
        PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4(CLIENT_IP, SERVER_IP, 64)
            .tcp(self.client_port, SERVER_PORT, seq, 65535)
    }

    fn server(&self, seq: u32) -> etherparse::PacketBuilderStep<etherparse::TcpHeader> {
        PacketBuilder::ethernet2([2; 6], [1; 6])
            .ipv4(SERVER_IP, CLIENT_IP, 64)
            .tcp(SERVER_PORT, self.client_port, seq, 65535)
    }

    fn frame(&mut self, builder: etherparse::PacketBuilderStep<etherparse::TcpHeader>, payload: &[u8]) -> Frame {
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        Frame::ethernet(out, self.stamp())
    }

    pub fn client_syn(&mut self, seq: u32) -> Frame {
        let builder = self.client(seq).syn();
        self.frame(builder, &[])
    }

    pub fn client_data(&mut self, seq: u32, payload: &[u8]) -> Frame {
        let builder = self.client(seq).ack(1).psh();
        self.frame(builder, payload)
    }

    pub fn client_fin(&mut self, seq: u32) -> Frame {
        let builder = self.client(seq).ack(1).fin();
        self.frame(builder, &[])
    }

    pub fn server_data(&mut self, seq: u32, payload: &[u8]) -> Frame {
        let builder = self.server(seq).ack(1).psh();
        self.frame(builder, payload)
    }

    /// Source address the sniffer reports for client requests.
    pub fn client_addr(&self) -> String {
        SocketAddr::from((CLIENT_IP, self.client_port)).to_string()
    }
}

/// A frame channel already loaded with `frames` and closed.
pub fn replay(frames: Vec<Frame>) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(frames.len().max(1));
    for frame in frames {
        tx.try_send(frame).unwrap();
    }
    rx
}

pub type Seen = Arc<Mutex<Vec<Arc<ReconstructedRequest>>>>;

/// A handler that records every request it sees.
pub fn recorder() -> (impl Handler, Seen) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let handler = handler_fn("recorder", move |_token, request| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(request);
            Ok::<(), HandlerError>(())
        }
    });
    (handler, seen)
}

/// A handler that fails every request.
pub fn failing(name: &'static str) -> impl Handler {
    handler_fn(name, |_token, _request| async {
        Err::<(), HandlerError>(HandlerError::Other("rejected".into()))
    })
}

/// Start a mock upstream that answers `200 OK` and reports each raw request
/// it receives.
pub async fn start_mock_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let raw = read_request(&mut socket).await;
                        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        let _ = tx.send(raw);
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// Start a mock upstream that reports each request as soon as it is read but
/// holds every response until `true` is sent on the returned channel.
pub async fn start_stalling_upstream() -> (SocketAddr, watch::Sender<bool>, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release, released) = watch::channel(false);
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let mut released = released.clone();
            tokio::spawn(async move {
                let raw = read_request(&mut socket).await;
                let _ = tx.send(raw);
                let _ = released.wait_for(|open| *open).await;
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, release, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A port nothing listens on.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
