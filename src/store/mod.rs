//! # Cluster Store
//!
//! The slice of the Kubernetes API the bootstrapper consumes: get, list and
//! server-side apply for the handful of kinds it touches.
//!
//! [`ClusterStore`] is the seam between the replication logic and the cluster.
//! [`KubeStore`] backs it with a real client; tests substitute a mock or an
//! in-memory fake.

mod kube_store;

pub use kube_store::KubeStore;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict updating {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Kube(kube::Error::Api(response)) => response.code == 409,
            _ => false,
        }
    }

    /// Classify a kube error for the object `kind`/`name`.
    pub(crate) fn from_kube(kind: &'static str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
                kind,
                name: name.to_string(),
                message: response.message,
            },
            other => StoreError::Kube(other),
        }
    }
}

/// Errors that can report an optimistic-concurrency conflict.
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

impl ConflictAware for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

/// Server-side apply options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub field_manager: String,
    /// Take ownership of fields owned by other managers
    pub force: bool,
}

impl ApplyOptions {
    pub fn new(field_manager: impl Into<String>) -> Self {
        Self {
            field_manager: field_manager.into(),
            force: false,
        }
    }

    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Get a secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Server-side apply a secret; namespace and name are taken from its metadata
    async fn apply_secret(&self, secret: &Secret, options: &ApplyOptions)
        -> Result<(), StoreError>;

    /// Get a namespace by name
    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError>;

    /// List all namespaces
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError>;

    /// Get a mutating webhook configuration by name
    async fn get_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<MutatingWebhookConfiguration, StoreError>;

    /// Server-side apply a mutating webhook configuration
    async fn apply_webhook_configuration(
        &self,
        configuration: &MutatingWebhookConfiguration,
        options: &ApplyOptions,
    ) -> Result<(), StoreError>;
}

/// Bound `future` by `timeout`, surfacing expiry as [`StoreError::Timeout`].
pub async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout {
            operation,
            after: timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_from_kube_classifies_status_codes() {
        assert!(StoreError::from_kube("Secret", "creds", api_error(404)).is_not_found());
        assert!(StoreError::from_kube("Secret", "creds", api_error(409)).is_conflict());

        let other = StoreError::from_kube("Secret", "creds", api_error(500));
        assert!(!other.is_not_found());
        assert!(!other.is_conflict());
    }

    #[test]
    fn test_raw_kube_errors_are_classified() {
        assert!(StoreError::Kube(api_error(404)).is_not_found());
        assert!(StoreError::Kube(api_error(409)).is_conflict());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded("get secret", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(StoreError::Timeout { operation, after }) => {
                assert_eq!(operation, "get secret");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let result = bounded("list namespaces", Duration::from_secs(5), async {
            Ok::<_, StoreError>(3)
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}
