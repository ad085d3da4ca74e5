//! # Pod Admission
//!
//! Mutating admission endpoint for pods. The pod is run through every
//! [`PodDefaulter`]; the response carries a JSON patch from the submitted
//! pod to the mutated one.

use crate::constants::{ANNOTATION_DEFAULTED, DEFAULT_API_CALL_TIMEOUT_MS, MUTATE_POD_PATH};
use crate::observability::metrics;
use crate::store::{bounded, ClusterStore, StoreError};
use crate::webhook::defaulters::{default_pod, PodDefaulter};
use axum::{extract::State, routing::post, Json, Router};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, Span};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("expected a Pod object but got {0}")]
    UnexpectedObject(String),

    #[error("unable to get namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: StoreError,
    },

    #[error("defaulter {defaulter} panicked: {message}")]
    DefaulterPanic {
        defaulter: &'static str,
        message: String,
    },

    #[error("unable to convert pod: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct PodMutator {
    span: Span,
    store: Arc<dyn ClusterStore>,
    defaulters: Vec<Box<dyn PodDefaulter>>,
    scope_namespaces: HashSet<String>,
    call_timeout: Duration,
}

impl std::fmt::Debug for PodMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.defaulters.iter().map(|d| d.name()).collect();
        f.debug_struct("PodMutator")
            .field("defaulters", &names)
            .field("scope_namespaces", &self.scope_namespaces)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl PodMutator {
    pub fn new(
        span: Span,
        store: Arc<dyn ClusterStore>,
        defaulters: Vec<Box<dyn PodDefaulter>>,
        scope_namespaces: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            span,
            store,
            defaulters,
            scope_namespaces: scope_namespaces.into_iter().collect(),
            call_timeout: Duration::from_millis(DEFAULT_API_CALL_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, AdmissionError> {
        if self.scope_namespaces.contains(namespace) {
            return Ok(BTreeMap::new());
        }
        let ns = bounded(
            "get namespace",
            self.call_timeout,
            self.store.get_namespace(namespace),
        )
        .await
        .map_err(|source| AdmissionError::Namespace {
            namespace: namespace.to_string(),
            source,
        })?;
        Ok(ns.metadata.annotations.unwrap_or_default())
    }

    /// Run every defaulter against `pod`; returns whether the pod was modified.
    pub async fn mutate(&self, namespace: &str, pod: &mut Pod) -> Result<bool, AdmissionError> {
        let namespace_annotations = self.namespace_annotations(namespace).await?;

        let mut modified = false;
        for defaulter in &self.defaulters {
            self.span.in_scope(|| {
                debug!(
                    defaulter = defaulter.name(),
                    namespace,
                    pod = ?pod.metadata.name.as_ref().or(pod.metadata.generate_name.as_ref()),
                    "invoking defaulter"
                );
            });
            let changed = catch_unwind(AssertUnwindSafe(|| {
                default_pod(defaulter.as_ref(), pod, &namespace_annotations)
            }))
            .map_err(|payload| AdmissionError::DefaulterPanic {
                defaulter: defaulter.name(),
                message: panic_message(payload.as_ref()),
            })?;
            modified |= changed;
        }

        if modified {
            pod.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(ANNOTATION_DEFAULTED.to_string(), "true".to_string());
        }
        Ok(modified)
    }

    async fn review(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let Some(object) = &request.object else {
            return AdmissionResponse::from(request);
        };
        if request.kind.kind != "Pod" {
            return self.deny(request, &AdmissionError::UnexpectedObject(request.kind.kind.clone()));
        }

        let result = async {
            let original = serde_json::to_value(object)?;
            let mut pod: Pod = serde_json::from_value(original.clone())?;
            let namespace = request
                .namespace
                .clone()
                .or_else(|| pod.metadata.namespace.clone())
                .unwrap_or_default();
            if !self.mutate(&namespace, &mut pod).await? {
                return Ok(None);
            }
            let mutated = serde_json::to_value(&pod)?;
            Ok::<_, AdmissionError>(Some(json_patch::diff(&original, &mutated)))
        }
        .await;

        match result {
            Ok(None) => {
                metrics::increment_admission_requests("unchanged");
                AdmissionResponse::from(request)
            }
            Ok(Some(patch)) => match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => {
                    metrics::increment_admission_requests("patched");
                    self.span.in_scope(|| info!(uid = %request.uid, "pod defaulted"));
                    response
                }
                Err(e) => {
                    metrics::increment_admission_requests("denied");
                    AdmissionResponse::from(request)
                        .deny(format!("patch serialization error: {e}"))
                }
            },
            Err(e) => self.deny(request, &e),
        }
    }

    fn deny(&self, request: &AdmissionRequest<DynamicObject>, e: &AdmissionError) -> AdmissionResponse {
        metrics::increment_admission_requests("denied");
        self.span
            .in_scope(|| error!(uid = %request.uid, error = %e, "unable to default pod"));
        AdmissionResponse::from(request).deny(e.to_string())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown defaulting function panic".to_string()
    }
}

pub async fn mutate_handler(
    State(mutator): State<Arc<PodMutator>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            metrics::increment_admission_requests("invalid");
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutator.review(&request).await.into_review())
}

pub fn admission_router(mutator: Arc<PodMutator>) -> Router {
    Router::new()
        .route(MUTATE_POD_PATH, post(mutate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(mutator)
}
