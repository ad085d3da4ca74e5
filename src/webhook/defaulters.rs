//! # Pod Defaulters
//!
//! Mutation steps applied to pods at admission time. Each step is gated by an
//! annotation looked up on the pod and on its namespace:
//!
//! | Defaulter | Annotation | Gate |
//! |---|---|---|
//! | alter image registry | `rt-cfg.kyma-project.io/alter-img-registry` | on unless `"false"` |
//! | add image pull secret | `rt-cfg.kyma-project.io/add-img-pull-secret` | on unless `"false"` |
//! | add cluster trust bundle | `rt-cfg.kyma-project.io/add-cluster-trust-bundle` | on unless `"false"` |
//! | FIPS mode | `rt-cfg.kyma-project.io/set-fips-mode` | off unless `"true"` |

use crate::config::{BootstrapperConfig, ClusterTrustBundleMapping};
use crate::constants::{
    ANNOTATION_ADD_CLUSTER_TRUST_BUNDLE, ANNOTATION_ALTER_IMG_REGISTRY, ANNOTATION_SET_FIPS_MODE,
    ANNOTATION_SET_PULL_SECRET, ENV_FIPS_MODE_ENABLED,
};
use crate::webhook::registry::{alter_image_registry, trust_bundle_mount, trust_bundle_volume};
use k8s_openapi::api::core::v1::{Container, EnvVar, LocalObjectReference, Pod, PodSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Annotation gate of a defaulter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Enabled unless the annotation is `"false"` on the pod or its namespace
    OptOut(&'static str),
    /// Disabled unless the annotation is `"true"` on the pod or its namespace
    OptIn(&'static str),
}

impl Gate {
    #[must_use]
    pub fn is_enabled(
        &self,
        pod_annotations: &BTreeMap<String, String>,
        namespace_annotations: &BTreeMap<String, String>,
    ) -> bool {
        let is_set = |annotation: &str, value: &str| {
            [pod_annotations, namespace_annotations]
                .iter()
                .any(|annotations| annotations.get(annotation).map(String::as_str) == Some(value))
        };
        match self {
            Gate::OptOut(annotation) => !is_set(annotation, "false"),
            Gate::OptIn(annotation) => is_set(annotation, "true"),
        }
    }
}

/// One mutation step.
pub trait PodDefaulter: Send + Sync {
    /// Label used in logs and errors
    fn name(&self) -> &'static str;

    fn gate(&self) -> Gate;

    /// Mutate `pod` in place; returns whether anything changed.
    fn apply(&self, pod: &mut Pod) -> bool;
}

/// Run `defaulter` against `pod` if its gate is open.
pub fn default_pod(
    defaulter: &dyn PodDefaulter,
    pod: &mut Pod,
    namespace_annotations: &BTreeMap<String, String>,
) -> bool {
    let pod_annotations = pod.metadata.annotations.clone().unwrap_or_default();
    if !defaulter
        .gate()
        .is_enabled(&pod_annotations, namespace_annotations)
    {
        debug!(defaulter = defaulter.name(), "defaulter disabled by annotation");
        return false;
    }
    defaulter.apply(pod)
}

fn containers_mut(spec: &mut PodSpec) -> impl Iterator<Item = &mut Container> {
    spec.init_containers
        .iter_mut()
        .flatten()
        .chain(spec.containers.iter_mut())
}

#[derive(Debug, Clone)]
pub struct AlterImageRegistry {
    overrides: BTreeMap<String, String>,
}

impl AlterImageRegistry {
    #[must_use]
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { overrides }
    }
}

impl PodDefaulter for AlterImageRegistry {
    fn name(&self) -> &'static str {
        "alter-image-registry"
    }

    fn gate(&self) -> Gate {
        Gate::OptOut(ANNOTATION_ALTER_IMG_REGISTRY)
    }

    fn apply(&self, pod: &mut Pod) -> bool {
        let Some(spec) = pod.spec.as_mut() else {
            return false;
        };
        let mut modified = false;
        for container in containers_mut(spec) {
            let Some(image) = container.image.as_deref() else {
                continue;
            };
            let altered = alter_image_registry(image, &self.overrides);
            if altered == image {
                continue;
            }
            debug!(container = %container.name, image = %altered, "image altered");
            container.image = Some(altered);
            modified = true;
        }
        modified
    }
}

#[derive(Debug, Clone)]
pub struct AddImagePullSecret {
    secret_name: String,
}

impl AddImagePullSecret {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
        }
    }
}

impl PodDefaulter for AddImagePullSecret {
    fn name(&self) -> &'static str {
        "add-image-pull-secret"
    }

    fn gate(&self) -> Gate {
        Gate::OptOut(ANNOTATION_SET_PULL_SECRET)
    }

    fn apply(&self, pod: &mut Pod) -> bool {
        let spec = pod.spec.get_or_insert_with(PodSpec::default);
        let secrets = spec.image_pull_secrets.get_or_insert_with(Vec::new);
        if secrets.iter().any(|s| s.name == self.secret_name) {
            debug!("image pull secret already found");
            return false;
        }
        debug!(secret = %self.secret_name, "adding image pull secret");
        secrets.push(LocalObjectReference {
            name: self.secret_name.clone(),
        });
        true
    }
}

#[derive(Debug, Clone)]
pub struct AddClusterTrustBundle {
    mapping: ClusterTrustBundleMapping,
}

impl AddClusterTrustBundle {
    #[must_use]
    pub fn new(mapping: ClusterTrustBundleMapping) -> Self {
        Self { mapping }
    }
}

impl PodDefaulter for AddClusterTrustBundle {
    fn name(&self) -> &'static str {
        "add-cluster-trust-bundle"
    }

    fn gate(&self) -> Gate {
        Gate::OptOut(ANNOTATION_ADD_CLUSTER_TRUST_BUNDLE)
    }

    fn apply(&self, pod: &mut Pod) -> bool {
        let Some(spec) = pod.spec.as_mut() else {
            return false;
        };
        let mut modified = false;

        let volume = trust_bundle_volume(&self.mapping);
        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        match volumes.iter_mut().find(|v| v.name == volume.name) {
            None => {
                debug!(volume = %volume.name, "volume added");
                volumes.push(volume);
                modified = true;
            }
            Some(existing) if *existing != volume => {
                debug!(volume = %volume.name, "volume replaced");
                *existing = volume;
                modified = true;
            }
            Some(_) => {}
        }

        let mount = trust_bundle_mount(&self.mapping);
        for container in containers_mut(spec) {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            match mounts.iter_mut().find(|m| m.name == mount.name) {
                None => {
                    mounts.push(mount.clone());
                    modified = true;
                }
                Some(existing) if *existing != mount => {
                    *existing = mount.clone();
                    modified = true;
                }
                Some(_) => {}
            }
        }
        modified
    }
}

#[derive(Debug, Clone, Default)]
pub struct FipsMode;

impl PodDefaulter for FipsMode {
    fn name(&self) -> &'static str {
        "fips-mode"
    }

    fn gate(&self) -> Gate {
        Gate::OptIn(ANNOTATION_SET_FIPS_MODE)
    }

    fn apply(&self, pod: &mut Pod) -> bool {
        let Some(spec) = pod.spec.as_mut() else {
            return false;
        };
        let wanted = EnvVar {
            name: ENV_FIPS_MODE_ENABLED.to_string(),
            value: Some("true".to_string()),
            ..EnvVar::default()
        };
        let mut modified = false;
        for container in containers_mut(spec) {
            let env = container.env.get_or_insert_with(Vec::new);
            match env.iter_mut().find(|e| e.name == ENV_FIPS_MODE_ENABLED) {
                None => {
                    env.push(wanted.clone());
                    modified = true;
                }
                Some(existing) if *existing != wanted => {
                    debug!(container = %container.name, "replacing env variable");
                    *existing = wanted.clone();
                    modified = true;
                }
                Some(_) => {}
            }
        }
        modified
    }
}

/// Defaulters enabled by `config`, in the order they run.
#[must_use]
pub fn build_defaulters(config: &BootstrapperConfig) -> Vec<Box<dyn PodDefaulter>> {
    let mut defaulters: Vec<Box<dyn PodDefaulter>> = vec![
        Box::new(AddImagePullSecret::new(&config.image_pull_secret_name)),
        Box::new(AlterImageRegistry::new(config.overrides.clone())),
    ];
    if let Some(mapping) = &config.cluster_trust_bundle_mapping {
        defaulters.push(Box::new(AddClusterTrustBundle::new(mapping.clone())));
    }
    defaulters.push(Box::new(FipsMode));
    defaulters
}
