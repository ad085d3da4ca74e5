//! # Bootstrapper Configuration
//!
//! The JSON document mounted into the pod (see [`DEFAULT_CONFIG_FILE_PATH`]).
//! It names the master pull secret, the registry overrides applied by the
//! admission webhook, the resync interval and the webhook configuration whose
//! CA bundle is kept current.
//!
//! ```json
//! {
//!   "overrides": { "europe-docker.pkg.dev": "registry.example.com" },
//!   "imagePullSecretName": "registry-credentials",
//!   "imagePullSecretNamespace": "kyma-system",
//!   "secretSyncInterval": "10m"
//! }
//! ```
//!
//! [`DEFAULT_CONFIG_FILE_PATH`]: crate::constants::DEFAULT_CONFIG_FILE_PATH

use crate::config::duration::ConfigDuration;
use crate::constants::{
    DEFAULT_FIELD_MANAGER, DEFAULT_WEBHOOK_CONFIGURATION_NAME, WEBHOOK_FIELD_MANAGER_SUFFIX,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to decode configuration: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid configuration: {field} {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Cluster trust bundle projected into every mutated pod.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTrustBundleMapping {
    /// Name of the `ClusterTrustBundle` object to project
    pub name: String,
    /// File name the bundle is written to inside the volume
    pub cert_write_path: String,
    /// Mount path of the volume in every container
    pub volume_mount_path: String,
    /// Name of the projected volume
    pub volume_name: String,
}

impl ClusterTrustBundleMapping {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("clusterTrustBundleMapping.name", &self.name),
            ("clusterTrustBundleMapping.certWritePath", &self.cert_write_path),
            (
                "clusterTrustBundleMapping.volumeMountPath",
                &self.volume_mount_path,
            ),
            ("clusterTrustBundleMapping.volumeName", &self.volume_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "is required"));
            }
        }
        Ok(())
    }
}

/// Namespaces whose annotations are never looked up by the admission webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapperConfig {
    /// Registry host overrides applied to container images
    pub overrides: BTreeMap<String, String>,
    /// Name of the master pull secret (and of every namespace copy)
    pub image_pull_secret_name: String,
    /// Namespace holding the master pull secret
    pub image_pull_secret_namespace: String,
    /// Interval of the periodic fan-out resync
    pub secret_sync_interval: ConfigDuration,
    #[serde(default)]
    pub cluster_trust_bundle_mapping: Option<ClusterTrustBundleMapping>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_webhook_configuration_name")]
    pub webhook_configuration_name: String,
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

fn default_webhook_configuration_name() -> String {
    DEFAULT_WEBHOOK_CONFIGURATION_NAME.to_string()
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

impl BootstrapperConfig {
    /// Decode and validate a configuration document.
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, decode and validate the configuration file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_pull_secret_name.trim().is_empty() {
            return Err(ConfigError::invalid("imagePullSecretName", "is required"));
        }
        if self.image_pull_secret_namespace.trim().is_empty() {
            return Err(ConfigError::invalid(
                "imagePullSecretNamespace",
                "is required",
            ));
        }
        if self.secret_sync_interval.0.is_zero() {
            return Err(ConfigError::invalid(
                "secretSyncInterval",
                "must be greater than zero",
            ));
        }
        if self.overrides.keys().any(|registry| registry.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "overrides",
                "must not contain an empty registry name",
            ));
        }
        if self.webhook_configuration_name.trim().is_empty() {
            return Err(ConfigError::invalid(
                "webhookConfigurationName",
                "must not be empty",
            ));
        }
        if self.field_manager.trim().is_empty() {
            return Err(ConfigError::invalid("fieldManager", "must not be empty"));
        }
        if let Some(mapping) = &self.cluster_trust_bundle_mapping {
            mapping.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn secret_sync_interval(&self) -> Duration {
        self.secret_sync_interval.0
    }

    /// Field manager used when patching the webhook configuration.
    #[must_use]
    pub fn webhook_field_manager(&self) -> String {
        format!("{}{WEBHOOK_FIELD_MANAGER_SUFFIX}", self.field_manager)
    }
}
