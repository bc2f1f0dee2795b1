//! Provider Custom Resource Definition
//!
//! A Provider describes one external identity federation endpoint: a GCP
//! workload identity pool provider and the project that owns it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

const KIND: &str = "Provider";

/// Location used when a Provider does not set one
pub const DEFAULT_LOCATION: &str = "global";

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

/// Specification for a Provider
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "wimount.dev",
    version = "v1alpha1",
    kind = "Provider",
    plural = "providers",
    status = "ProviderStatus",
    namespaced,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.poolID"}"#,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.project.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ProviderSpec {
    /// Target type tag (only `gcp` is supported)
    pub target: String,

    /// Workload identity pool ID
    #[serde(rename = "poolID")]
    pub pool_id: String,

    /// Pool location
    #[serde(default = "default_location")]
    pub location: String,

    /// Workload identity pool provider ID
    #[serde(rename = "providerID")]
    pub provider_id: String,

    /// Project owning the pool
    pub project: ProjectRef,
}

/// GCP project coordinates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProjectRef {
    /// Project ID
    pub name: String,
    /// Numeric project number
    pub number: String,
}

impl ProviderSpec {
    /// Location with the `global` default applied to empty values
    pub fn effective_location(&self) -> &str {
        if self.location.is_empty() {
            DEFAULT_LOCATION
        } else {
            &self.location
        }
    }

    /// Validate the required fields
    pub fn validate(&self) -> Result<(), crate::Error> {
        let required = [
            ("spec.target", &self.target),
            ("spec.poolID", &self.pool_id),
            ("spec.providerID", &self.provider_id),
            ("spec.project.name", &self.project.name),
            ("spec.project.number", &self.project.number),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(crate::Error::validation(KIND, field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Status for a Provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// Conditions reported by external tooling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
