//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → SniffwireConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, resolve_config, ConfigError};
pub use schema::{
    CaptureConfig, ForwardingConfig, FramingConfig, HostFilterConfig, LogFormat, ObservabilityConfig,
    ReassemblyConfig, SniffwireConfig, TargetProtocol,
};
pub use validation::{validate_config, ValidationError};
