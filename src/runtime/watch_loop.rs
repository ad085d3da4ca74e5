//! # Watch Loop
//!
//! Drives reconciliation: change events pass through the predicates, become
//! work items and are handed to the reconciler through a deduplicating
//! scheduler. Requeues (periodic resync, follow-ups, error backoff) are fed
//! back into the same scheduler.
//!
//! A work item is never reconciled twice at the same time; an item that
//! comes due while it is still running is pushed back by [`BUSY_REQUEUE_DELAY`].

use crate::controller::classify::{MasterSecretRef, WorkItem};
use crate::controller::events::{ChangeEvent, EventAdapter, WatchedObject};
use crate::controller::predicates::EventPredicate;
use crate::controller::reconciler::Reconciler;
use crate::runtime::error_policy::ErrorPolicy;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::{future, stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::Api;
use kube::Client;
use kube_runtime::scheduler::{scheduler, ScheduleRequest};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};

/// Delay applied to a work item that came due while still being reconciled
pub const BUSY_REQUEUE_DELAY: Duration = Duration::from_millis(100);

/// A stream of change events together with the predicate gating it.
pub struct EventSource {
    events: stream::BoxStream<'static, ChangeEvent>,
    predicate: Arc<dyn EventPredicate>,
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("predicate", &self.predicate.name())
            .finish_non_exhaustive()
    }
}

impl EventSource {
    pub fn new(
        events: impl Stream<Item = ChangeEvent> + Send + 'static,
        predicate: Arc<dyn EventPredicate>,
    ) -> Self {
        Self {
            events: events.boxed(),
            predicate,
        }
    }

    fn into_work_items(self) -> impl Stream<Item = WorkItem> + Send {
        let predicate = self.predicate;
        self.events
            .filter(move |event| future::ready(predicate.admits(event)))
            .map(|event| event.work_item())
    }
}

/// Turn a raw watcher stream into change events. Watch errors are logged;
/// the watcher itself backs off and resumes.
pub fn change_events<K, S>(watch: S) -> impl Stream<Item = ChangeEvent> + Send
where
    K: Into<WatchedObject> + Send,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
{
    let mut adapter = EventAdapter::new();
    watch
        .filter_map(|result| {
            future::ready(match result {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "watch stream error");
                    None
                }
            })
        })
        .flat_map(move |event| stream::iter(adapter.ingest(event)))
}

/// Watch every namespace.
pub fn namespace_events(client: Client) -> impl Stream<Item = ChangeEvent> + Send {
    let api: Api<Namespace> = Api::all(client);
    change_events(watcher(api, watcher::Config::default()).default_backoff())
}

/// Watch secrets named like the master secret, in every namespace.
pub fn secret_events(
    client: Client,
    master: &MasterSecretRef,
) -> impl Stream<Item = ChangeEvent> + Send {
    let api: Api<Secret> = Api::all(client);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", master.name));
    change_events(watcher(api, config).default_backoff())
}

type Requeue = UnboundedSender<ScheduleRequest<WorkItem>>;

pub struct WatchLoop {
    span: Span,
    reconciler: Arc<Reconciler>,
    error_policy: ErrorPolicy,
    max_concurrent: usize,
    in_flight: Mutex<HashSet<WorkItem>>,
}

impl std::fmt::Debug for WatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchLoop")
            .field("error_policy", &self.error_policy)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl WatchLoop {
    pub fn new(
        span: Span,
        reconciler: Arc<Reconciler>,
        error_policy: ErrorPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            span,
            reconciler,
            error_policy,
            max_concurrent: max_concurrent.max(1),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Reconcile work items derived from `sources` until `shutdown` resolves.
    pub async fn run(&self, sources: Vec<EventSource>, shutdown: impl Future<Output = ()>) {
        let (requeue, requeued) = unbounded();
        let admitted = stream::select_all(
            sources
                .into_iter()
                .map(|source| source.into_work_items().boxed()),
        )
        .map(|item| ScheduleRequest {
            message: item,
            run_at: Instant::now(),
        });

        self.span.in_scope(|| info!("starting watch loop"));
        scheduler(stream::select(admitted, requeued))
            .take_until(shutdown)
            .for_each_concurrent(self.max_concurrent, |item| self.process(item, &requeue))
            .instrument(self.span.clone())
            .await;
        self.span.in_scope(|| info!("watch loop stopped"));
    }

    async fn process(&self, item: WorkItem, requeue: &Requeue) {
        if !self.lock_in_flight().insert(item.clone()) {
            debug!(item = %item, "work item busy, requeueing");
            schedule(requeue, item, BUSY_REQUEUE_DELAY);
            return;
        }

        let result = self.reconciler.reconcile(&item).await;
        self.lock_in_flight().remove(&item);

        match result {
            Ok(outcome) => {
                self.error_policy.on_success(&item);
                for follow_up in outcome.follow_ups {
                    schedule(requeue, follow_up, Duration::ZERO);
                }
                if let Some(after) = outcome.requeue_after {
                    schedule(requeue, item, after);
                }
            }
            Err(e) => {
                let delay = self.error_policy.on_error(&item, &e);
                schedule(requeue, item, delay);
            }
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<WorkItem>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn schedule(requeue: &Requeue, item: WorkItem, after: Duration) {
    let request = ScheduleRequest {
        message: item,
        run_at: Instant::now() + after,
    };
    if requeue.unbounded_send(request).is_err() {
        debug!("scheduler stopped, dropping requeue");
    }
}
