//! libpcap-backed frame source.
//!
//! # Responsibilities
//! - Open a live interface or an offline capture file
//! - Compile and install the BPF filter before any frame is read
//! - Pump frames into a bounded channel from a dedicated OS thread
//!
//! # Design Decisions
//! - libpcap reads block, so the pump runs on `std::thread` and hands frames
//!   to the async side with `blocking_send`; a full channel stalls capture
//!   rather than dropping frames silently in user space
//! - Live captures use a read timeout so the stop flag is observed promptly

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use pcap::{Activated, Active, Capture, Offline};
use tokio::sync::mpsc;

use crate::capture::{CaptureError, Frame, LinkType};
use crate::config::CaptureConfig;

enum PacketCapture {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// An opened, filtered capture that has not started reading yet.
pub struct CaptureSource {
    capture: PacketCapture,
    link: LinkType,
    description: String,
    queue_frames: usize,
}

impl CaptureSource {
    /// Open the source described by `config`.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let (capture, description) = if config.live {
            let capture = Capture::from_device(config.interface.as_str())
                .and_then(|c| {
                    c.promisc(config.promiscuous)
                        .snaplen(config.snaplen)
                        .timeout(config.read_timeout_ms)
                        .immediate_mode(true)
                        .open()
                })
                .map_err(|source| CaptureError::Open {
                    target: config.interface.clone(),
                    source,
                })?;
            (PacketCapture::Live(capture), format!("interface {}", config.interface))
        } else {
            let capture = Capture::from_file(&config.pcap_path).map_err(|source| CaptureError::Open {
                target: config.pcap_path.clone(),
                source,
            })?;
            (PacketCapture::Offline(capture), format!("file {}", config.pcap_path))
        };

        let mut source = Self {
            capture,
            link: LinkType::Unsupported(-1),
            description,
            queue_frames: config.queue_frames,
        };
        source.apply_filter(&config.filter)?;
        source.link = source.datalink();

        if let LinkType::Unsupported(dlt) = source.link {
            return Err(CaptureError::UnsupportedLinkType(dlt));
        }

        tracing::info!(
            source = %source.description,
            filter = %config.filter,
            link = ?source.link,
            "Capture opened"
        );
        Ok(source)
    }

    fn apply_filter(&mut self, filter: &str) -> Result<(), CaptureError> {
        if filter.is_empty() {
            return Ok(());
        }
        let result = match &mut self.capture {
            PacketCapture::Live(c) => c.filter(filter, true),
            PacketCapture::Offline(c) => c.filter(filter, true),
        };
        result.map_err(|source| CaptureError::Filter {
            filter: filter.to_string(),
            source,
        })
    }

    fn datalink(&self) -> LinkType {
        let linktype = match &self.capture {
            PacketCapture::Live(c) => c.get_datalink(),
            PacketCapture::Offline(c) => c.get_datalink(),
        };
        LinkType::from_dlt(linktype.0)
    }

    /// Start the pump thread. Frames arrive on the returned receiver until
    /// the file ends, the handle is stopped, or the receiver is dropped.
    pub fn start(self) -> Result<(mpsc::Receiver<Frame>, CaptureHandle), CaptureError> {
        let (tx, rx) = mpsc::channel(self.queue_frames.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let link = self.link;
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("sniffwire-capture".to_string())
            .spawn(move || match self.capture {
                PacketCapture::Live(mut c) => pump(&mut c, link, &tx, &thread_stop),
                PacketCapture::Offline(mut c) => pump(&mut c, link, &tx, &thread_stop),
            })
            .map_err(CaptureError::Thread)?;

        Ok((
            rx,
            CaptureHandle {
                stop,
                thread: Some(thread),
            },
        ))
    }
}

/// Read frames until told to stop. Returns the number of frames delivered.
fn pump<T: Activated + ?Sized>(
    capture: &mut Capture<T>,
    link: LinkType,
    tx: &mpsc::Sender<Frame>,
    stop: &AtomicBool,
) -> Result<u64, CaptureError> {
    let mut delivered = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(CaptureError::Read(e)),
        };

        let ts = &packet.header.ts;
        let timestamp = SystemTime::UNIX_EPOCH
            + Duration::from_secs(ts.tv_sec.max(0) as u64)
            + Duration::from_micros(ts.tv_usec.max(0) as u64);
        let frame = Frame::new(packet.data.to_vec(), timestamp, link);

        if tx.blocking_send(frame).is_err() {
            // Consumer gone.
            break;
        }
        delivered += 1;
    }
    tracing::debug!(frames = delivered, "Capture pump finished");
    Ok(delivered)
}

/// Control handle of a running capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<u64, CaptureError>>>,
}

impl CaptureHandle {
    /// Ask the pump to stop after its current read.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the pump thread. Blocks; call from a blocking context.
    pub fn join(mut self) -> Result<u64, CaptureError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| CaptureError::ThreadPanicked)?,
            None => Ok(0),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
