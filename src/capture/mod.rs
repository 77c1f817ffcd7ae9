//! Packet capture subsystem.

pub mod frame;
pub mod source;

pub use frame::{Frame, LinkType};
pub use source::{CaptureHandle, CaptureSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open capture on {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Invalid capture filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Unsupported link type (DLT {0})")]
    UnsupportedLinkType(i32),

    #[error("Capture read failed: {0}")]
    Read(#[source] pcap::Error),

    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("Capture thread panicked")]
    ThreadPanicked,
}
