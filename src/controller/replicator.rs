//! # Secret Replicator
//!
//! Realizes the replication scenarios against the cluster store:
//!
//! - [`SecretReplicator::fan_out`]: mark the copy in every namespace outdated
//! - [`SecretReplicator::sync_namespace`]: pull the master payload into one namespace
//! - [`SecretReplicator::create_in_namespace`]: same as sync, for a namespace
//!   that just appeared
//!
//! Every write is a server-side apply of the desired state, so re-delivery of
//! the same work item converges on the same result.

use crate::constants::{ANNOTATION_OUTDATED, DOCKER_CONFIG_JSON_KEY};
use crate::controller::classify::MasterSecretRef;
use crate::observability::metrics;
use crate::store::{ApplyOptions, ClusterStore, StoreError};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Span};

/// Default number of namespaces patched concurrently during a fan-out
pub const DEFAULT_FAN_OUT_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("unable to fetch master secret {namespace}/{name}: {source}")]
    MasterSecretUnavailable {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("master secret {namespace}/{name} has no .dockerconfigjson entry")]
    MissingPayload { namespace: String, name: String },

    #[error("unable to list namespaces: {0}")]
    ListNamespaces(#[source] StoreError),

    #[error("unable to patch secret in namespace {namespace}: {source}")]
    Patch {
        namespace: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to reconcile due to patch errors: {}", join_failures(.failures))]
    FanOut { failures: Vec<(String, StoreError)> },
}

fn join_failures(failures: &[(String, StoreError)]) -> String {
    failures
        .iter()
        .map(|(_, e)| e.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Result of a successful fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Namespaces whose copy now carries the outdated marker
    pub marked: Vec<String>,
    /// Namespaces whose apply reported not found
    pub skipped: Vec<String>,
}

enum PatchOutcome {
    Applied(String),
    Skipped(String),
    Failed(String, StoreError),
}

pub struct SecretReplicator {
    span: Span,
    store: Arc<dyn ClusterStore>,
    master: MasterSecretRef,
    field_manager: String,
    concurrency: usize,
}

impl std::fmt::Debug for SecretReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretReplicator")
            .field("master", &self.master)
            .field("field_manager", &self.field_manager)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl SecretReplicator {
    pub fn new(
        span: Span,
        store: Arc<dyn ClusterStore>,
        master: MasterSecretRef,
        field_manager: impl Into<String>,
    ) -> Self {
        Self {
            span,
            store,
            master,
            field_manager: field_manager.into(),
            concurrency: DEFAULT_FAN_OUT_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn master(&self) -> &MasterSecretRef {
        &self.master
    }

    /// Mark the copy in every namespace but the master's outdated.
    ///
    /// A copy that cannot be found is skipped. Other failures are collected
    /// and reported together once every namespace has been attempted;
    /// successful patches are kept.
    pub async fn fan_out(&self) -> Result<FanOutReport, ReplicationError> {
        let namespaces = self
            .store
            .list_namespaces()
            .await
            .map_err(ReplicationError::ListNamespaces)?;

        let targets: Vec<String> = namespaces
            .iter()
            .map(ResourceExt::name_any)
            .filter(|name| !name.is_empty() && *name != self.master.namespace)
            .collect();

        self.span.in_scope(|| {
            debug!(targets = targets.len(), "attempting to synchronize all known secrets");
        });

        let options = ApplyOptions::new(&self.field_manager);
        let outcomes: Vec<PatchOutcome> = stream::iter(targets)
            .map(|namespace| {
                let options = &options;
                async move {
                    let marker = self.outdated_marker(&namespace);
                    match self.store.apply_secret(&marker, options).await {
                        Ok(()) => PatchOutcome::Applied(namespace),
                        Err(e) if e.is_not_found() => PatchOutcome::Skipped(namespace),
                        Err(e) => PatchOutcome::Failed(namespace, e),
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = FanOutReport::default();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                PatchOutcome::Applied(namespace) => {
                    metrics::increment_secret_patches("applied");
                    self.span.in_scope(|| {
                        debug!(name = %self.master.name, namespace = %namespace, "secret marked outdated");
                    });
                    report.marked.push(namespace);
                }
                PatchOutcome::Skipped(namespace) => {
                    metrics::increment_secret_patches("skipped");
                    self.span.in_scope(|| {
                        debug!(namespace = %namespace, "namespace vanished, skipping");
                    });
                    report.skipped.push(namespace);
                }
                PatchOutcome::Failed(namespace, error) => {
                    metrics::increment_secret_patches("failed");
                    self.span.in_scope(|| {
                        warn!(namespace = %namespace, error = %error, "unable to mark secret outdated");
                    });
                    failures.push((namespace, error));
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            return Err(ReplicationError::FanOut { failures });
        }

        report.marked.sort();
        report.skipped.sort();
        self.span.in_scope(|| {
            info!(
                marked = report.marked.len(),
                skipped = report.skipped.len(),
                "all secrets marked outdated"
            );
        });
        Ok(report)
    }

    /// Overwrite the copy in `namespace` with the master payload.
    pub async fn sync_namespace(&self, namespace: &str) -> Result<(), ReplicationError> {
        self.span.in_scope(|| {
            debug!(namespace, "attempting to synchronize secret");
        });
        let payload = self.master_payload().await?;
        self.apply_copy(namespace, payload).await
    }

    /// Create the copy in a newly created `namespace`.
    ///
    /// A namespace that vanished before the apply is not an error. The master
    /// namespace itself is never written to.
    pub async fn create_in_namespace(&self, namespace: &str) -> Result<(), ReplicationError> {
        if namespace == self.master.namespace {
            self.span.in_scope(|| {
                debug!(namespace, "namespace holds the master secret, nothing to create");
            });
            return Ok(());
        }

        self.span.in_scope(|| {
            debug!(namespace, "attempting to create secret");
        });
        let payload = self.master_payload().await?;
        match self.apply_copy(namespace, payload).await {
            Err(ReplicationError::Patch { source, .. }) if source.is_not_found() => {
                metrics::increment_secret_patches("skipped");
                self.span.in_scope(|| {
                    debug!(namespace, "namespace vanished before the secret could be created");
                });
                Ok(())
            }
            result => result,
        }
    }

    async fn master_payload(&self) -> Result<ByteString, ReplicationError> {
        let master = self
            .store
            .get_secret(&self.master.namespace, &self.master.name)
            .await
            .map_err(|source| ReplicationError::MasterSecretUnavailable {
                namespace: self.master.namespace.clone(),
                name: self.master.name.clone(),
                source,
            })?;

        master
            .data
            .and_then(|mut data| data.remove(DOCKER_CONFIG_JSON_KEY))
            .ok_or_else(|| ReplicationError::MissingPayload {
                namespace: self.master.namespace.clone(),
                name: self.master.name.clone(),
            })
    }

    async fn apply_copy(&self, namespace: &str, payload: ByteString) -> Result<(), ReplicationError> {
        let copy = self.credentials_copy(namespace, payload);
        let options = ApplyOptions::new(&self.field_manager).force();
        match self.store.apply_secret(&copy, &options).await {
            Ok(()) => {
                metrics::increment_secret_patches("applied");
                self.span.in_scope(|| {
                    info!(name = %self.master.name, namespace, "secret synchronized");
                });
                Ok(())
            }
            Err(source) => {
                if !source.is_not_found() {
                    metrics::increment_secret_patches("failed");
                }
                Err(ReplicationError::Patch {
                    namespace: namespace.to_string(),
                    source,
                })
            }
        }
    }

    /// Annotation-only apply; the payload is pulled by the namespace's own sync.
    fn outdated_marker(&self, namespace: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.master.name.clone()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_OUTDATED.to_string(),
                    "true".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    /// Payload apply with an empty annotation set, which drops a previously
    /// applied outdated marker.
    fn credentials_copy(&self, namespace: &str, payload: ByteString) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.master.name.clone()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::new()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                DOCKER_CONFIG_JSON_KEY.to_string(),
                payload,
            )])),
            ..Secret::default()
        }
    }
}
