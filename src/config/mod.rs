//! # Configuration
//!
//! - `bootstrapper`: the JSON document describing what is replicated and mutated
//! - `controller`: process-level knobs read from the environment
//! - `duration`: duration values as written in the JSON document

pub mod bootstrapper;
pub mod controller;
pub mod duration;

pub use bootstrapper::{BootstrapperConfig, ClusterTrustBundleMapping, ConfigError, Scope};
pub use controller::ControllerConfig;
pub use duration::{parse_duration, ConfigDuration, DurationParseError};
