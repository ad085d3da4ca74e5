//! # Reconciler
//!
//! Entry point for one work item: classify it, run the matching replication
//! path and tell the engine what to schedule next.

use crate::controller::classify::{classify, MasterSecretRef, Scenario, WorkItem};
use crate::controller::replicator::{ReplicationError, SecretReplicator};
use crate::observability::metrics;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation of {item} failed: {source}")]
    Replication {
        item: WorkItem,
        #[source]
        source: ReplicationError,
    },
}

/// What the engine should do after a successful reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Run the same work item again after this delay
    pub requeue_after: Option<Duration>,
    /// Further work items to enqueue right away
    pub follow_ups: Vec<WorkItem>,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub struct Reconciler {
    span: Span,
    replicator: SecretReplicator,
    secret_sync_interval: Duration,
}

impl Reconciler {
    pub fn new(span: Span, replicator: SecretReplicator, secret_sync_interval: Duration) -> Self {
        Self {
            span,
            replicator,
            secret_sync_interval,
        }
    }

    #[must_use]
    pub fn master(&self) -> &MasterSecretRef {
        self.replicator.master()
    }

    pub async fn reconcile(&self, item: &WorkItem) -> Result<ReconcileOutcome, ReconcilerError> {
        let scenario = classify(item, self.master());
        let span = info_span!(
            parent: &self.span,
            "reconcile",
            item = %item,
            scenario = scenario.label(),
            uuid = %uuid::Uuid::new_v4(),
        );

        let started = Instant::now();
        metrics::increment_reconciliations(scenario.label());
        let result = self
            .run(item, &scenario)
            .instrument(span.clone())
            .await
            .map_err(|source| ReconcilerError::Replication {
                item: item.clone(),
                source,
            });
        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::increment_reconciliation_errors(scenario.label());
            span.in_scope(|| error!(error = %e, "reconciliation failed"));
        }
        result
    }

    async fn run(
        &self,
        item: &WorkItem,
        scenario: &Scenario,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        debug!("reconciling request");
        match scenario {
            Scenario::MasterUpdated => {
                let report = self.replicator.fan_out().await?;
                let follow_ups = report
                    .marked
                    .into_iter()
                    .map(|namespace| WorkItem::new(namespace, self.master().name.clone()))
                    .collect::<Vec<_>>();
                info!(
                    follow_ups = follow_ups.len(),
                    requeue_after = ?self.secret_sync_interval,
                    "fan-out complete"
                );
                Ok(ReconcileOutcome {
                    requeue_after: Some(self.secret_sync_interval),
                    follow_ups,
                })
            }
            Scenario::NamespaceUpdated { namespace } => {
                self.replicator.sync_namespace(namespace).await?;
                Ok(ReconcileOutcome::done())
            }
            Scenario::NamespaceCreated { namespace } => {
                self.replicator.create_in_namespace(namespace).await?;
                Ok(ReconcileOutcome::done())
            }
            Scenario::Unhandled => {
                warn!(item = %item, "unhandled request");
                Ok(ReconcileOutcome::done())
            }
        }
    }
}
