//! Common test utilities for integration tests
//!
//! [`FakeStore`] is an in-memory [`ClusterStore`]. Applies follow server-side
//! apply closely enough for the bootstrapper: annotations are owned per field
//! manager (a manager re-applying without a key drops it), data keys are
//! merged, webhook configurations carry a resource version that is checked
//! on apply.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use rt_bootstrapper::constants::{ANNOTATION_OUTDATED, DOCKER_CONFIG_JSON_KEY};
use rt_bootstrapper::store::{ApplyOptions, ClusterStore, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Once};

static RUSTLS_INIT: Once = Once::new();

/// Initialize the rustls crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    annotation_owners: BTreeMap<Key, BTreeMap<String, BTreeSet<String>>>,
    webhook_configurations: BTreeMap<String, MutatingWebhookConfiguration>,
    /// Namespaces still listed but gone by the time a secret is applied
    vanished: BTreeSet<String>,
    /// Namespaces whose secret applies fail with a server error
    failing: BTreeSet<String>,
    conflicts_to_inject: usize,
    secret_writes: usize,
    webhook_writes: usize,
    webhook_applies: Vec<(serde_json::Value, ApplyOptions)>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn webhook(name: &str, ca: &str) -> MutatingWebhook {
    MutatingWebhook {
        name: name.to_string(),
        client_config: WebhookClientConfig {
            ca_bundle: Some(ByteString(ca.as_bytes().to_vec())),
            ..WebhookClientConfig::default()
        },
        ..MutatingWebhook::default()
    }
}

fn server_error(message: &str) -> StoreError {
    StoreError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.lock()
            .namespaces
            .insert(name.to_string(), namespace(name));
        self
    }

    pub fn add_namespace(&self, name: &str) {
        self.lock()
            .namespaces
            .insert(name.to_string(), namespace(name));
    }

    /// Seed a secret holding `payload` without counting it as a write.
    pub fn with_secret(self, namespace: &str, name: &str, payload: &str) -> Self {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                DOCKER_CONFIG_JSON_KEY.to_string(),
                ByteString(payload.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        };
        self.lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), secret);
        self
    }

    pub fn with_webhook_configuration(self, name: &str, webhooks: Vec<MutatingWebhook>) -> Self {
        let configuration = MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                resource_version: Some("1".to_string()),
                managed_fields: Some(vec![Default::default()]),
                ..ObjectMeta::default()
            },
            webhooks: Some(webhooks),
            ..MutatingWebhookConfiguration::default()
        };
        self.lock()
            .webhook_configurations
            .insert(name.to_string(), configuration);
        self
    }

    pub fn vanish_namespace(&self, name: &str) {
        self.lock().vanished.insert(name.to_string());
    }

    pub fn fail_patches_in(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    pub fn accept_patches_in(&self, name: &str) {
        self.lock().failing.remove(name);
    }

    /// Make the next `count` webhook configuration applies fail with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.lock().conflicts_to_inject = count;
    }

    /// Simulate another writer bumping the resource version.
    pub fn touch_webhook_configuration(&self, name: &str) {
        let mut state = self.lock();
        if let Some(configuration) = state.webhook_configurations.get_mut(name) {
            configuration.metadata.resource_version = Some(bump(
                configuration.metadata.resource_version.as_deref(),
            ));
        }
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn payload(&self, namespace: &str, name: &str) -> Option<String> {
        self.secret(namespace, name)
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(DOCKER_CONFIG_JSON_KEY))
            .map(|bytes| String::from_utf8(bytes.0).unwrap())
    }

    pub fn is_outdated(&self, namespace: &str, name: &str) -> bool {
        self.secret(namespace, name)
            .and_then(|s| s.metadata.annotations)
            .is_some_and(|a| a.get(ANNOTATION_OUTDATED).map(String::as_str) == Some("true"))
    }

    /// Every secret as `(namespace, name) -> (payload, outdated)`
    pub fn snapshot(&self) -> BTreeMap<Key, (Option<String>, bool)> {
        let keys: Vec<Key> = self.lock().secrets.keys().cloned().collect();
        keys.into_iter()
            .map(|(ns, name)| {
                let value = (self.payload(&ns, &name), self.is_outdated(&ns, &name));
                ((ns, name), value)
            })
            .collect()
    }

    pub fn secret_writes(&self) -> usize {
        self.lock().secret_writes
    }

    pub fn webhook_configuration(&self, name: &str) -> Option<MutatingWebhookConfiguration> {
        self.lock().webhook_configurations.get(name).cloned()
    }

    pub fn ca_bundles(&self, name: &str) -> Vec<String> {
        self.webhook_configuration(name)
            .and_then(|c| c.webhooks)
            .unwrap_or_default()
            .into_iter()
            .map(|w| {
                w.client_config
                    .ca_bundle
                    .map(|b| String::from_utf8(b.0).unwrap())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn webhook_writes(&self) -> usize {
        self.lock().webhook_writes
    }

    /// Serialized body and options of every webhook configuration apply, failed ones included
    pub fn webhook_applies(&self) -> Vec<(serde_json::Value, ApplyOptions)> {
        self.lock().webhook_applies.clone()
    }
}

fn bump(resource_version: Option<&str>) -> String {
    let current: u64 = resource_version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secret(namespace, name).ok_or_else(|| StoreError::NotFound {
            kind: "Secret",
            name: format!("{namespace}/{name}"),
        })
    }

    async fn apply_secret(&self, secret: &Secret, options: &ApplyOptions) -> Result<(), StoreError> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();

        if state.failing.contains(&namespace) {
            return Err(server_error(&format!("apply in {namespace} refused")));
        }
        if state.vanished.contains(&namespace) || !state.namespaces.contains_key(&namespace) {
            return Err(StoreError::NotFound {
                kind: "Namespace",
                name: namespace,
            });
        }

        let key = (namespace.clone(), name.clone());
        let applied: BTreeMap<String, String> =
            secret.metadata.annotations.clone().unwrap_or_default();

        let owners = state.annotation_owners.entry(key.clone()).or_default();
        let previously_owned = owners
            .insert(options.field_manager.clone(), applied.keys().cloned().collect())
            .unwrap_or_default();
        let released: Vec<String> = previously_owned
            .into_iter()
            .filter(|k| !applied.contains_key(k))
            .filter(|k| owners.values().all(|keys| !keys.contains(k)))
            .collect();

        let stored = state.secrets.entry(key).or_insert_with(|| Secret {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        });
        let annotations = stored.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for key in released {
            annotations.remove(&key);
        }
        annotations.extend(applied);
        if let Some(data) = &secret.data {
            stored
                .data
                .get_or_insert_with(BTreeMap::new)
                .extend(data.clone());
        }

        state.secret_writes += 1;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        self.lock()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Namespace",
                name: name.to_string(),
            })
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        Ok(self.lock().namespaces.values().cloned().collect())
    }

    async fn get_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<MutatingWebhookConfiguration, StoreError> {
        self.webhook_configuration(name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "MutatingWebhookConfiguration",
                name: name.to_string(),
            })
    }

    async fn apply_webhook_configuration(
        &self,
        configuration: &MutatingWebhookConfiguration,
        options: &ApplyOptions,
    ) -> Result<(), StoreError> {
        let name = configuration.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.webhook_applies.push((
            serde_json::to_value(configuration).unwrap(),
            options.clone(),
        ));

        let conflict = |message: &str| StoreError::Conflict {
            kind: "MutatingWebhookConfiguration",
            name: name.clone(),
            message: message.to_string(),
        };
        if state.conflicts_to_inject > 0 {
            state.conflicts_to_inject -= 1;
            return Err(conflict("the object has been modified"));
        }

        let Some(stored) = state.webhook_configurations.get(&name).cloned() else {
            return Err(StoreError::NotFound {
                kind: "MutatingWebhookConfiguration",
                name: name.clone(),
            });
        };
        if let Some(version) = &configuration.metadata.resource_version {
            if stored.metadata.resource_version.as_ref() != Some(version) {
                return Err(conflict("resource version mismatch"));
            }
        }

        let mut updated = configuration.clone();
        updated.metadata.resource_version =
            Some(bump(stored.metadata.resource_version.as_deref()));
        updated.metadata.managed_fields = stored.metadata.managed_fields;
        state.webhook_configurations.insert(name, updated);
        state.webhook_writes += 1;
        Ok(())
    }
}
