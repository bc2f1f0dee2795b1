//! The owned slice of a Deployment pod template
//!
//! Minimal serde structs for exactly the fields wimount asserts. They render
//! to the server-side apply body, so anything not listed here is never sent
//! and never claimed by the field manager.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::subset;

/// Owned pod-level fields: one entry per container plus the two volumes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadOverlay {
    /// Per-container env and mounts
    pub containers: Vec<ContainerOverlay>,
    /// Config and token volumes
    pub volumes: Vec<Volume>,
}

/// Owned fields of a single container
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverlay {
    /// Container name (merge key)
    pub name: String,
    /// Environment variables
    pub env: Vec<EnvVar>,
    /// Volume mounts
    pub volume_mounts: Vec<VolumeMount>,
}

/// Literal environment variable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    pub value: String,
}

/// Volume mount
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path inside the container
    pub mount_path: String,
    /// Mount read-only
    pub read_only: bool,
}

/// Pod volume, either ConfigMap-backed or projected
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// ConfigMap source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSource>,
    /// Projected source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projected: Option<ProjectedVolumeSource>,
}

impl Volume {
    /// Volume backed by a ConfigMap of the same name
    pub fn from_config_map(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            config_map: Some(ConfigMapVolumeSource { name: name.clone() }),
            projected: None,
            name,
        }
    }

    /// Projected volume holding a single service account token
    pub fn service_account_token(
        name: impl Into<String>,
        audience: impl Into<String>,
        expiration_seconds: i64,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            config_map: None,
            projected: Some(ProjectedVolumeSource {
                sources: vec![VolumeProjection {
                    service_account_token: ServiceAccountTokenProjection {
                        audience: audience.into(),
                        expiration_seconds,
                        path: path.into(),
                    },
                }],
            }),
        }
    }
}

/// ConfigMap volume source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapVolumeSource {
    /// ConfigMap name
    pub name: String,
}

/// Projected volume source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectedVolumeSource {
    /// Projections
    pub sources: Vec<VolumeProjection>,
}

/// One projection of a projected volume
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProjection {
    /// Service account token projection
    pub service_account_token: ServiceAccountTokenProjection,
}

/// Service account token projection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountTokenProjection {
    /// Intended token audience
    pub audience: String,
    /// Requested lifetime in seconds
    pub expiration_seconds: i64,
    /// File name inside the volume
    pub path: String,
}

impl WorkloadOverlay {
    fn pod_spec_value(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether every owned field is already present on the live template.
    ///
    /// Server-populated defaults and fields owned by other managers are
    /// ignored. A template that cannot be serialized counts as drifted.
    pub fn is_applied_to(&self, template: &PodTemplateSpec) -> bool {
        let (Ok(desired), Ok(live)) = (
            self.pod_spec_value(),
            serde_json::to_value(template.spec.clone().unwrap_or_default()),
        ) else {
            return false;
        };
        subset::is_subset(&desired, &live)
    }

    /// Set the owned fields on a pod template, leaving the rest intact
    pub fn merge_into(&self, template: &mut PodTemplateSpec) -> crate::Result<()> {
        let mut live = serde_json::to_value(template.spec.clone().unwrap_or_default())?;
        subset::merge(&mut live, &self.pod_spec_value()?);
        template.spec = Some(serde_json::from_value(live)?);
        Ok(())
    }

    /// Server-side apply body for the Deployment, owned fields only
    pub fn to_apply_body(&self, name: &str, namespace: &str) -> crate::Result<serde_json::Value> {
        Ok(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": name,
                "namespace": namespace,
            },
            "spec": {
                "template": {
                    "spec": self.pod_spec_value()?,
                },
            },
        }))
    }
}
