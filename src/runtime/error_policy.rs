//! # Error Policy
//!
//! Requeue delays for failed work items. Each work item carries its own
//! exponential backoff so one failing namespace does not slow down others.
//! A successful reconcile resets the item.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::classify::WorkItem;
use crate::controller::reconciler::ReconcilerError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug)]
pub struct ErrorPolicy {
    start: Duration,
    max: Duration,
    states: Mutex<HashMap<WorkItem, ExponentialBackoff>>,
}

impl ErrorPolicy {
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before `item` is retried after `error`.
    pub fn on_error(&self, item: &WorkItem, error: &ReconcilerError) -> Duration {
        let delay = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(item.clone())
            .or_insert_with(|| ExponentialBackoff::new(self.start, self.max))
            .next_backoff();

        warn!(item = %item, error = %error, "reconciliation error");
        info!(item = %item, retry_in = ?delay, "retrying with exponential backoff");
        delay
    }

    pub fn on_success(&self, item: &WorkItem) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(item);
    }

    /// Number of work items currently backing off
    #[must_use]
    pub fn failing(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
