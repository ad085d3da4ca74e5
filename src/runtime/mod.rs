//! # Runtime
//!
//! Process wiring and the loop driving reconciliation.
//!
//! - `initialization`: startup, shutdown and component wiring
//! - `watch_loop`: change events to scheduled work items to reconciles
//! - `error_policy`: per work item error backoff

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use error_policy::ErrorPolicy;
pub use initialization::{run, RuntimeOptions};
pub use watch_loop::{change_events, EventSource, WatchLoop};
