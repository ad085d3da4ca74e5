//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use rt_bootstrapper::prelude::*;
//! ```
//!
//! This brings into scope:
//! - Work items and the reconciler
//! - Event predicates and change events
//! - The cluster store seam and its errors
//! - The trust bundle updater
//! - Config types

pub use crate::controller::{
    classify, ChangeEvent, EventPredicate, MasterSecretPredicate, MasterSecretRef,
    NamespaceCreatedPredicate, ReconcileOutcome, Reconciler, ReconcilerError, ReplicationError,
    RetryPolicy, Scenario, SecretReplicator, WatchedObject, WorkItem,
};

pub use crate::store::{ApplyOptions, ClusterStore, ConflictAware, StoreError};

pub use crate::webhook::{CaBundleError, CaBundleUpdater, UpdateOutcome};

pub use crate::config::{BootstrapperConfig, ControllerConfig};
