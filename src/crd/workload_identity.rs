//! WorkloadIdentity Custom Resource Definition
//!
//! A WorkloadIdentity asks the operator to let one Deployment authenticate as
//! a GCP service account through workload identity federation, using the
//! pool described by a [`Provider`](super::Provider).

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{upsert_condition, Condition};

const KIND: &str = "WorkloadIdentity";

/// Specification for a WorkloadIdentity
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "wimount.dev",
    version = "v1alpha1",
    kind = "WorkloadIdentity",
    plural = "workloadidentities",
    shortname = "wi",
    status = "WorkloadIdentityStatus",
    namespaced,
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deployment"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentitySpec {
    /// Name of the Deployment in the same namespace to patch
    pub deployment: String,

    /// Email of the GCP service account to impersonate
    pub target_service_account: String,

    /// Provider holding the workload identity pool coordinates
    pub provider: ProviderRef,
}

/// Reference to a Provider, defaulting to the referrer's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderRef {
    /// Provider name
    pub name: String,

    /// Provider namespace, empty means the WorkloadIdentity's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ProviderRef {
    /// Namespace to look the Provider up in
    pub fn resolve_namespace<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => fallback,
        }
    }
}

impl WorkloadIdentitySpec {
    /// Validate the required fields
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.deployment.is_empty() {
            return Err(crate::Error::validation(
                KIND,
                "spec.deployment",
                "deployment must not be empty",
            ));
        }
        if self.target_service_account.is_empty() {
            return Err(crate::Error::validation(
                KIND,
                "spec.targetServiceAccount",
                "targetServiceAccount must not be empty",
            ));
        }
        if self.provider.name.is_empty() {
            return Err(crate::Error::validation(
                KIND,
                "spec.provider.name",
                "provider name must not be empty",
            ));
        }
        Ok(())
    }
}

impl WorkloadIdentity {
    /// `(namespace, name)` of the referenced Provider after defaulting
    pub fn provider_key(&self) -> (String, String) {
        let own_ns = self.namespace().unwrap_or_default();
        (
            self.spec.provider.resolve_namespace(&own_ns).to_string(),
            self.spec.provider.name.clone(),
        )
    }

    /// Name of the generated credential ConfigMap
    pub fn config_map_name(&self) -> String {
        format!("wimount-{}-{}-conf", self.name_any(), self.spec.deployment)
    }

    /// The current Ready condition, if any
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == READY_CONDITION))
    }
}

/// Condition type summarising the last reconciliation
pub const READY_CONDITION: &str = "Ready";

/// Status for a WorkloadIdentity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentityStatus {
    /// Conditions representing the last reconciliation outcome
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec the conditions were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl WorkloadIdentityStatus {
    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        upsert_condition(&mut self.conditions, condition);
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}
