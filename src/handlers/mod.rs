//! Built-in request handlers.

pub mod filter;
pub mod logger;
pub mod proxy;

pub use filter::HostFilter;
pub use logger::LogHandler;
pub use proxy::ProxyHandler;
