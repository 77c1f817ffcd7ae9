//! Capture-to-handler pipeline.

pub mod sniffer;

pub use sniffer::{ClockMode, PipelineStats, Sniffer};

use thiserror::Error;

use crate::dispatch::DispatchError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline stopped: {0}")]
    Handler(#[from] DispatchError),
}
