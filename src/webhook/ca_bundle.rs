//! # CA Bundle Updater
//!
//! Keeps the CA bundle of every webhook in the mutating webhook configuration
//! equal to the CA certificate the webhook server was last loaded with.
//!
//! One update is a fetch-compare-apply sequence. The apply carries the
//! fetched `resourceVersion`, so a concurrent writer surfaces as a conflict
//! and the whole sequence is retried under a [`RetryPolicy`].

use crate::constants::DEFAULT_API_CALL_TIMEOUT_MS;
use crate::controller::retry::{retry_on_conflict, RetryPolicy};
use crate::observability::metrics;
use crate::store::{bounded, ApplyOptions, ClusterStore, ConflictAware, StoreError};
use k8s_openapi::ByteString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, Span};

#[derive(Debug, Error)]
pub enum CaBundleError {
    #[error("unable to get mutating webhook configuration {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("unable to patch mutating webhook configuration {name}: {source}")]
    Patch {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("unable to read CA certificate {path}: {source}")]
    ReadCaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConflictAware for CaBundleError {
    fn is_conflict(&self) -> bool {
        match self {
            CaBundleError::Fetch { source, .. } | CaBundleError::Patch { source, .. } => {
                source.is_conflict()
            }
            CaBundleError::ReadCaFile { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// At least one webhook carried a different bundle and the configuration was applied
    Patched,
    /// Every webhook already carried the bundle; nothing was written
    Unchanged,
}

impl UpdateOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Patched => "patched",
            UpdateOutcome::Unchanged => "unchanged",
        }
    }
}

pub struct CaBundleUpdater {
    span: Span,
    store: Arc<dyn ClusterStore>,
    configuration_name: String,
    field_manager: String,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CaBundleUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaBundleUpdater")
            .field("configuration_name", &self.configuration_name)
            .field("field_manager", &self.field_manager)
            .field("call_timeout", &self.call_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CaBundleUpdater {
    pub fn new(
        span: Span,
        store: Arc<dyn ClusterStore>,
        configuration_name: impl Into<String>,
        field_manager: impl Into<String>,
    ) -> Self {
        Self {
            span,
            store,
            configuration_name: configuration_name.into(),
            field_manager: field_manager.into(),
            call_timeout: Duration::from_millis(DEFAULT_API_CALL_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Propagate `ca_bundle` to every webhook, retrying on conflict.
    pub async fn update(&self, ca_bundle: &[u8]) -> Result<UpdateOutcome, CaBundleError> {
        let result = retry_on_conflict(self.retry, move || self.update_once(ca_bundle)).await;
        match &result {
            Ok(outcome) => metrics::increment_ca_bundle_updates(outcome.as_str()),
            Err(e) => {
                metrics::increment_ca_bundle_updates("failed");
                self.span.in_scope(|| {
                    error!(name = %self.configuration_name, error = %e, "unable to update CA bundle");
                });
            }
        }
        result
    }

    async fn update_once(&self, ca_bundle: &[u8]) -> Result<UpdateOutcome, CaBundleError> {
        let name = self.configuration_name.as_str();
        let mut configuration = bounded(
            "get mutating webhook configuration",
            self.call_timeout,
            self.store.get_webhook_configuration(name),
        )
        .await
        .map_err(|source| CaBundleError::Fetch {
            name: name.to_string(),
            source,
        })?;

        let mut updated = false;
        for webhook in configuration.webhooks.iter_mut().flatten() {
            let current = webhook.client_config.ca_bundle.as_ref().map(|b| b.0.as_slice());
            if current == Some(ca_bundle) {
                continue;
            }
            webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
            updated = true;
        }

        if !updated {
            self.span.in_scope(|| {
                info!(name, "mutating webhook configuration up to date");
            });
            return Ok(UpdateOutcome::Unchanged);
        }

        // Server-managed bookkeeping is not part of the desired state;
        // resourceVersion is kept so a concurrent write is detected.
        configuration.metadata.managed_fields = None;

        self.span.in_scope(|| {
            info!(name, "attempting to patch mutating webhook configuration");
        });
        let options = ApplyOptions::new(&self.field_manager).force();
        bounded(
            "apply mutating webhook configuration",
            self.call_timeout,
            self.store
                .apply_webhook_configuration(&configuration, &options),
        )
        .await
        .map_err(|source| CaBundleError::Patch {
            name: name.to_string(),
            source,
        })?;

        self.span.in_scope(|| debug!(name, "CA bundle patched"));
        Ok(UpdateOutcome::Patched)
    }
}
