//! Kubernetes-backed [`ClusterStore`].

use super::{bounded, ApplyOptions, ClusterStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use std::time::Duration;
use tracing::debug;

/// [`ClusterStore`] talking to the API server.
///
/// Every call is bounded by `timeout` so one slow request cannot stall a
/// fan-out across many namespaces.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn patch_params(options: &ApplyOptions) -> PatchParams {
        let params = PatchParams::apply(&options.field_manager);
        if options.force {
            params.force()
        } else {
            params
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        bounded("get secret", self.timeout, async {
            api.get(name)
                .await
                .map_err(|e| StoreError::from_kube("Secret", &format!("{namespace}/{name}"), e))
        })
        .await
    }

    async fn apply_secret(
        &self,
        secret: &Secret,
        options: &ApplyOptions,
    ) -> Result<(), StoreError> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::InvalidObject("secret without a name".to_string()))?;
        let namespace = secret.metadata.namespace.as_deref().ok_or_else(|| {
            StoreError::InvalidObject(format!("secret {name} without a namespace"))
        })?;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = Self::patch_params(options);
        bounded("apply secret", self.timeout, async {
            api.patch(name, &params, &Patch::Apply(secret))
                .await
                .map_err(|e| StoreError::from_kube("Secret", &format!("{namespace}/{name}"), e))
        })
        .await?;

        debug!(namespace, name, field_manager = %options.field_manager, "secret applied");
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        bounded("get namespace", self.timeout, async {
            api.get(name)
                .await
                .map_err(|e| StoreError::from_kube("Namespace", name, e))
        })
        .await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        bounded("list namespaces", self.timeout, async {
            let list = api.list(&ListParams::default()).await?;
            Ok(list.items)
        })
        .await
    }

    async fn get_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<MutatingWebhookConfiguration, StoreError> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        bounded("get mutating webhook configuration", self.timeout, async {
            api.get(name)
                .await
                .map_err(|e| StoreError::from_kube("MutatingWebhookConfiguration", name, e))
        })
        .await
    }

    async fn apply_webhook_configuration(
        &self,
        configuration: &MutatingWebhookConfiguration,
        options: &ApplyOptions,
    ) -> Result<(), StoreError> {
        let name = configuration.metadata.name.as_deref().ok_or_else(|| {
            StoreError::InvalidObject("mutating webhook configuration without a name".to_string())
        })?;

        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        let params = Self::patch_params(options);
        bounded("apply mutating webhook configuration", self.timeout, async {
            api.patch(name, &params, &Patch::Apply(configuration))
                .await
                .map_err(|e| StoreError::from_kube("MutatingWebhookConfiguration", name, e))
        })
        .await?;

        debug!(name, field_manager = %options.field_manager, "webhook configuration applied");
        Ok(())
    }
}
