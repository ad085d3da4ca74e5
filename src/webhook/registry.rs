//! Image reference and pod spec helpers shared by the defaulters.

use crate::config::ClusterTrustBundleMapping;
use k8s_openapi::api::core::v1::{
    ClusterTrustBundleProjection, ProjectedVolumeSource, Volume, VolumeMount, VolumeProjection,
};
use std::collections::BTreeMap;

/// Replace the registry of `image` with its override, if the image names an
/// explicit registry (first path segment contains `.` or `:`) and an override
/// for it exists.
#[must_use]
pub fn alter_image_registry(image: &str, overrides: &BTreeMap<String, String>) -> String {
    let Some((first, rest)) = image.split_once('/') else {
        return image.to_string();
    };
    if !(first.contains('.') || first.contains(':')) {
        return image.to_string();
    }
    match overrides.get(first) {
        Some(registry) => format!("{registry}/{rest}"),
        None => image.to_string(),
    }
}

/// True if every key of `wanted` is present in `actual` with the same value.
#[must_use]
pub fn contains(actual: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

/// Projected volume carrying the cluster trust bundle.
#[must_use]
pub fn trust_bundle_volume(mapping: &ClusterTrustBundleMapping) -> Volume {
    Volume {
        name: mapping.volume_name.clone(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(vec![VolumeProjection {
                cluster_trust_bundle: Some(ClusterTrustBundleProjection {
                    name: Some(mapping.name.clone()),
                    path: mapping.cert_write_path.clone(),
                    ..ClusterTrustBundleProjection::default()
                }),
                ..VolumeProjection::default()
            }]),
            ..ProjectedVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// Read-only mount of the trust bundle volume.
#[must_use]
pub fn trust_bundle_mount(mapping: &ClusterTrustBundleMapping) -> VolumeMount {
    VolumeMount {
        name: mapping.volume_name.clone(),
        mount_path: mapping.volume_mount_path.clone(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}
