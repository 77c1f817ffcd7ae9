//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop ingestion → Close flows → Drain framers → Stop pool → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second signal  → Forced exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop capture, drain flows, then the forwarding pool
//! - Draining has a timeout after which in-flight handlers are cancelled

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
