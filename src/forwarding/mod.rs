//! Request forwarding subsystem.

pub mod outbound;
pub mod pool;

pub use outbound::{HeaderOptions, OutboundRequest, Target};
pub use pool::{ForwardingPool, PoolStats};

use thiserror::Error;

use crate::dispatch::HandlerError;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Invalid remote address {0:?}")]
    InvalidRemote(String),

    #[error("Invalid value for header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("Forwarding pool is shut down")]
    Closed,

    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),
}

impl From<ForwardError> for HandlerError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::InvalidRemote(remote) => HandlerError::InvalidRemote(remote),
            ForwardError::InvalidHeader { name, reason } => HandlerError::InvalidHeader { name, reason },
            ForwardError::Closed => HandlerError::PoolClosed,
            ForwardError::Client(e) => HandlerError::Other(e.to_string()),
        }
    }
}
