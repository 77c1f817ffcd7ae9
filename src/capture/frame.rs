//! Captured link-layer frames.

use std::time::SystemTime;

use bytes::Bytes;

/// Link-layer framing of a capture, as reported by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_EN10MB.
    Ethernet,
    /// DLT_NULL / DLT_LOOP: 4-byte address family header.
    Loopback,
    /// DLT_RAW / LINKTYPE_IPV4 / LINKTYPE_IPV6: bare IP packets.
    RawIp,
    /// DLT_LINUX_SLL: 16-byte cooked header.
    LinuxSll,
    /// DLT_LINUX_SLL2: 20-byte cooked header.
    LinuxSll2,
    /// Anything else; frames are rejected by the classifier.
    Unsupported(i32),
}

impl LinkType {
    /// Map a libpcap DLT number.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => LinkType::Ethernet,
            0 | 108 => LinkType::Loopback,
            12 | 14 | 101 | 228 | 229 => LinkType::RawIp,
            113 => LinkType::LinuxSll,
            276 => LinkType::LinuxSll2,
            other => LinkType::Unsupported(other),
        }
    }
}

/// One captured frame and the time it was captured.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub timestamp: SystemTime,
    pub link: LinkType,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, timestamp: SystemTime, link: LinkType) -> Self {
        Self {
            data: data.into(),
            timestamp,
            link,
        }
    }

    /// Convenience for Ethernet frames, the common case.
    pub fn ethernet(data: impl Into<Bytes>, timestamp: SystemTime) -> Self {
        Self::new(data, timestamp, LinkType::Ethernet)
    }
}
