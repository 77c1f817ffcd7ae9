//! Flow identity types.
//!
//! # Responsibilities
//! - Represent one endpoint of a TCP conversation
//! - Canonicalize the endpoint pair so both directions share one identity
//! - Distinguish the two byte streams of a flow by direction

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// One side of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr brackets IPv6 hosts so the result parses back.
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

/// Transport protocol of a flow. Only TCP is reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
}

/// Unordered endpoint pair plus protocol.
///
/// `low` always sorts before `high`, so the identity built from a packet and
/// from its reply compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowIdentity {
    low: Endpoint,
    high: Endpoint,
    protocol: Transport,
}

impl FlowIdentity {
    /// Build the identity for a packet travelling `src -> dst` and report
    /// which direction of the identity that packet travels.
    pub fn from_packet(src: Endpoint, dst: Endpoint, protocol: Transport) -> (Self, Direction) {
        if src <= dst {
            (Self { low: src, high: dst, protocol }, Direction::LowToHigh)
        } else {
            (Self { low: dst, high: src, protocol }, Direction::HighToLow)
        }
    }

    pub fn protocol(&self) -> Transport {
        self.protocol
    }
}

impl fmt::Display for FlowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// Which half of a flow a byte stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    LowToHigh,
    HighToLow,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::LowToHigh => Direction::HighToLow,
            Direction::HighToLow => Direction::LowToHigh,
        }
    }
}

/// Key of one reassembled byte stream: a flow and the direction its bytes
/// travel in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub identity: FlowIdentity,
    pub direction: Direction,
}

impl FlowKey {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        let (identity, direction) = FlowIdentity::from_packet(src, dst, Transport::Tcp);
        Self { identity, direction }
    }

    /// Sender of this half of the flow.
    pub fn source(&self) -> Endpoint {
        match self.direction {
            Direction::LowToHigh => self.identity.low,
            Direction::HighToLow => self.identity.high,
        }
    }

    /// Receiver of this half of the flow.
    pub fn destination(&self) -> Endpoint {
        match self.direction {
            Direction::LowToHigh => self.identity.high,
            Direction::HighToLow => self.identity.low,
        }
    }

    /// Key of the opposite byte stream of the same flow.
    pub fn reverse(&self) -> Self {
        Self {
            identity: self.identity,
            direction: self.direction.reverse(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source(), self.destination())
    }
}
