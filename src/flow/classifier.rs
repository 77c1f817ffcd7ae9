//! Frame classification.
//!
//! # Responsibilities
//! - Decode the link, network and transport layers of one captured frame
//! - Unwrap one level of tunnel encapsulation (VXLAN, IP-in-IP)
//! - Produce the flow key and TCP segment the reassembly engine consumes
//!
//! # Data Flow
//! ```text
//! Frame ──▶ strip link header ──▶ scan layers ──▶ last IP + last TCP ──▶ (FlowKey, Segment)
//!                                     │
//!                                     └── VXLAN / IP-in-IP payload scanned again (once)
//! ```
//!
//! # Design Decisions
//! - The innermost network layer is authoritative; for tunneled traffic the
//!   outer addresses belong to the tunnel endpoints, not the conversation
//! - Inner layers that fail to decode end the scan quietly; the outer layers
//!   already collected still decide the outcome

use std::net::IpAddr;

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use thiserror::Error;

use crate::capture::{Frame, LinkType};
use crate::flow::{Endpoint, FlowKey, Segment};

/// UDP port VXLAN is registered on.
pub const VXLAN_PORT: u16 = 4789;
const VXLAN_HEADER_LEN: usize = 8;
const VXLAN_FLAG_VNI: u8 = 0x08;

const IPPROTO_IPIP: u8 = 4;
const IPPROTO_IPV6: u8 = 41;

/// How many tunnel layers are unwrapped.
const MAX_ENCAPSULATION: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// Frame missing, undecodable, or without a network/transport layer.
    #[error("Unusable frame: {0}")]
    Unusable(&'static str),

    /// Transport layer present, but not TCP.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(&'static str),
}

impl ClassifyError {
    /// Label used for the frame outcome metric.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifyError::Unusable(_) => "unusable",
            ClassifyError::UnsupportedTransport(_) => "unsupported_transport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    Ethernet,
    Ip,
}

#[derive(Debug)]
struct TcpLayer {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    syn: bool,
    fin: bool,
    rst: bool,
    payload: Bytes,
}

#[derive(Debug)]
enum Layer {
    Link,
    Network { src: IpAddr, dst: IpAddr },
    Udp,
    Vxlan,
    Tcp(TcpLayer),
    OtherTransport,
}

/// Classify one captured frame.
pub fn classify(frame: &Frame) -> Result<(FlowKey, Segment), ClassifyError> {
    if frame.data.is_empty() {
        return Err(ClassifyError::Unusable("empty frame"));
    }

    let (start, offset) = match frame.link {
        LinkType::Ethernet => (Start::Ethernet, 0),
        LinkType::RawIp => (Start::Ip, 0),
        LinkType::Loopback => (Start::Ip, 4),
        LinkType::LinuxSll => (Start::Ip, 16),
        LinkType::LinuxSll2 => (Start::Ip, 20),
        LinkType::Unsupported(_) => return Err(ClassifyError::Unusable("unsupported link type")),
    };
    if frame.data.len() <= offset {
        return Err(ClassifyError::Unusable("truncated link header"));
    }

    let mut layers = Vec::with_capacity(6);
    if offset > 0 {
        layers.push(Layer::Link);
    }
    scan(&frame.data, &frame.data[offset..], start, 0, &mut layers)?;

    let mut network = None;
    let mut tcp = None;
    let mut saw_transport = false;
    for layer in layers {
        match layer {
            Layer::Network { src, dst } => network = Some((src, dst)),
            Layer::Tcp(t) => {
                saw_transport = true;
                tcp = Some(t);
            }
            Layer::Udp | Layer::OtherTransport => saw_transport = true,
            Layer::Link | Layer::Vxlan => {}
        }
    }

    let (src, dst) = network.ok_or(ClassifyError::Unusable("no network layer"))?;
    let tcp = match tcp {
        Some(tcp) => tcp,
        None if saw_transport => return Err(ClassifyError::UnsupportedTransport("not tcp")),
        None => return Err(ClassifyError::Unusable("no transport layer")),
    };

    let key = FlowKey::new(Endpoint::new(src, tcp.src_port), Endpoint::new(dst, tcp.dst_port));
    let segment = Segment {
        seq: tcp.seq,
        payload: tcp.payload,
        syn: tcp.syn,
        fin: tcp.fin,
        rst: tcp.rst,
    };
    Ok((key, segment))
}

/// Decode `data` and push every layer found onto `layers`, descending into
/// tunnel payloads up to [`MAX_ENCAPSULATION`] times.
fn scan(
    root: &Bytes,
    data: &[u8],
    start: Start,
    depth: usize,
    layers: &mut Vec<Layer>,
) -> Result<(), ClassifyError> {
    let sliced = match start {
        Start::Ethernet => SlicedPacket::from_ethernet(data),
        Start::Ip => SlicedPacket::from_ip(data),
    };
    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(_) if depth > 0 => return Ok(()),
        Err(_) => return Err(ClassifyError::Unusable("undecodable frame")),
    };

    if sliced.link.is_some() {
        layers.push(Layer::Link);
    }

    // Payload of an IP-in-IP packet, if this is one.
    let mut tunneled_ip: Option<&[u8]> = None;
    match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            layers.push(Layer::Network {
                src: IpAddr::V4(header.source_addr()),
                dst: IpAddr::V4(header.destination_addr()),
            });
            let payload = ipv4.payload();
            if is_ip_tunnel(payload.ip_number.0) && !payload.fragmented {
                tunneled_ip = Some(payload.payload);
            }
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            layers.push(Layer::Network {
                src: IpAddr::V6(header.source_addr()),
                dst: IpAddr::V6(header.destination_addr()),
            });
            let payload = ipv6.payload();
            if is_ip_tunnel(payload.ip_number.0) && !payload.fragmented {
                tunneled_ip = Some(payload.payload);
            }
        }
        #[allow(unreachable_patterns)]
        _ => {}
    }

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            layers.push(Layer::Tcp(TcpLayer {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                seq: tcp.sequence_number(),
                syn: tcp.syn(),
                fin: tcp.fin(),
                rst: tcp.rst(),
                payload: root.slice_ref(tcp.payload()),
            }));
        }
        Some(TransportSlice::Udp(udp)) => {
            layers.push(Layer::Udp);
            let payload = udp.payload();
            if depth < MAX_ENCAPSULATION && udp.destination_port() == VXLAN_PORT {
                if let Some(inner) = vxlan_payload(payload) {
                    layers.push(Layer::Vxlan);
                    scan(root, inner, Start::Ethernet, depth + 1, layers)?;
                }
            }
        }
        Some(_) => layers.push(Layer::OtherTransport),
        None => {}
    }

    if let Some(inner) = tunneled_ip {
        if depth < MAX_ENCAPSULATION {
            scan(root, inner, Start::Ip, depth + 1, layers)?;
        }
    }

    Ok(())
}

fn is_ip_tunnel(protocol: u8) -> bool {
    protocol == IPPROTO_IPIP || protocol == IPPROTO_IPV6
}

/// Strip the VXLAN header when the VNI flag is set.
fn vxlan_payload(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() <= VXLAN_HEADER_LEN || payload[0] & VXLAN_FLAG_VNI == 0 {
        return None;
    }
    Some(&payload[VXLAN_HEADER_LEN..])
}
