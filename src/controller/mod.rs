//! # Controller
//!
//! Credential replication for the bootstrapper.
//!
//! - `backoff`: exponential backoff for retries
//! - `classify`: work items and the scenario they request
//! - `events`: typed change events derived from watcher output
//! - `predicates`: filters deciding which change events matter
//! - `reconciler`: reconcile entry point for one work item
//! - `replicator`: fan-out and single-target secret replication
//! - `retry`: retry-on-conflict combinator

pub mod backoff;
pub mod classify;
pub mod events;
pub mod predicates;
pub mod reconciler;
pub mod replicator;
pub mod retry;

pub use classify::{classify, MasterSecretRef, Scenario, WorkItem};
pub use events::{ChangeEvent, EventAdapter, WatchedObject};
pub use predicates::{EventPredicate, MasterSecretPredicate, NamespaceCreatedPredicate};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerError};
pub use replicator::{FanOutReport, ReplicationError, SecretReplicator};
pub use retry::{retry_on_conflict, RetryPolicy};
