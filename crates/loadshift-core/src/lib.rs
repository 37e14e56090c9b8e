//! loadshift-core — types shared by every loadshift crate.
//!
//! Holds the authority flag and load sample types, the JSON bodies
//! exchanged with the primary service, and the `loadshift.toml`
//! configuration parser.

pub mod config;
pub mod error;
pub mod types;

pub use config::{HandoffConfig, LoadshiftConfig, PrimaryConfig, ScalingConfig, WorkerConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
