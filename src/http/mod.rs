//! HTTP request recovery subsystem.
//!
//! # Data Flow
//! ```text
//! FlowStream (contiguous bytes)
//!     → framer.rs (buffer, resync, bounded give-up)
//!     → parser.rs (httparse head, Content-Length / chunked body)
//!     → request.rs (ReconstructedRequest with origin metadata)
//!     → Dispatcher
//! ```

pub mod framer;
pub mod parser;
pub mod request;

pub use framer::RequestFramer;
pub use parser::{ParseError, ParseOutcome, ParsedRequest};
pub use request::{Headers, ReconstructedRequest};
