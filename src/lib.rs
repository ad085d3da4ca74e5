//! rt-bootstrapper Library
//!
//! Credential and trust synchronization for the runtime bootstrapper: the
//! master image pull secret is mirrored into every namespace, and the CA
//! bundle of the pod admission webhook follows certificate rotation.
//! Tests are included in the module files (e.g., replicator.rs).
//!
//! ## Quick Start
//!
//! ```rust
//! use rt_bootstrapper::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod store;
pub mod webhook;
