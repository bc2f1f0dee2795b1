//! Workload patch planning
//!
//! [`plan`] computes the [`WorkloadOverlay`] for a Deployment: the credential
//! env var and two read-only mounts on every container, plus the ConfigMap
//! and projected token volumes on the pod. Only container names are read
//! from the live template.

mod overlay;
mod subset;

use k8s_openapi::api::core::v1::PodTemplateSpec;

pub use overlay::{
    ConfigMapVolumeSource, ContainerOverlay, EnvVar, ProjectedVolumeSource,
    ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection, WorkloadOverlay,
};

use crate::config::FederationConfig;
use crate::credentials::ProviderTarget;
use crate::crd::{Provider, WorkloadIdentity};

/// Plan the overlay for the current pod template.
///
/// `config_name` is the generated ConfigMap; the volume carries the same
/// name. Fails with [`crate::Error::UnsupportedProviderTarget`] for unknown
/// Provider targets.
pub fn plan(
    current: &PodTemplateSpec,
    provider: &Provider,
    _identity: &WorkloadIdentity,
    config_name: &str,
    config: &FederationConfig,
) -> crate::Result<WorkloadOverlay> {
    let target = ProviderTarget::of(provider)?;

    let containers = current
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|c| ContainerOverlay {
            name: c.name.clone(),
            env: vec![EnvVar {
                name: config.credentials_env_var.clone(),
                value: config.config_file(),
            }],
            volume_mounts: vec![
                VolumeMount {
                    name: config.token_volume_name.clone(),
                    mount_path: config.token_mount_dir.clone(),
                    read_only: true,
                },
                VolumeMount {
                    name: config_name.to_string(),
                    mount_path: config.config_mount_dir.clone(),
                    read_only: true,
                },
            ],
        })
        .collect();

    Ok(WorkloadOverlay {
        containers,
        volumes: vec![
            Volume::from_config_map(config_name),
            Volume::service_account_token(
                &config.token_volume_name,
                target.token_audience(provider, config),
                config.token_expiration_seconds,
                &config.token_path,
            ),
        ],
    })
}
