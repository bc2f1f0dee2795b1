//! Credential configuration generation
//!
//! Maps a (Provider, WorkloadIdentity) pair to the credential document that
//! gets mounted into the workload. Pure and deterministic: the engine creates
//! the ConfigMap once and never rewrites it, so the same inputs must always
//! give the same bytes.

mod gcp;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::config::FederationConfig;
use crate::crd::{Provider, WorkloadIdentity};
use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};

/// Identity federation targets this operator can generate for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderTarget {
    /// GCP workload identity federation
    Gcp,
}

impl std::str::FromStr for ProviderTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gcp" => Ok(Self::Gcp),
            other => Err(Error::unsupported_target(other)),
        }
    }
}

impl std::fmt::Display for ProviderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gcp => write!(f, "gcp"),
        }
    }
}

impl ProviderTarget {
    /// Parse the target tag of a Provider
    pub fn of(provider: &Provider) -> crate::Result<Self> {
        provider.spec.target.parse()
    }

    /// Audience the projected service account token is issued for
    pub fn token_audience(&self, provider: &Provider, config: &FederationConfig) -> String {
        match self {
            Self::Gcp => gcp::token_audience(provider, config),
        }
    }

    /// Audience the credential document presents to the token exchange
    pub fn audience(&self, provider: &Provider, config: &FederationConfig) -> String {
        match self {
            Self::Gcp => gcp::audience(provider, config),
        }
    }

    fn document(
        &self,
        provider: &Provider,
        identity: &WorkloadIdentity,
        config: &FederationConfig,
    ) -> crate::Result<String> {
        match self {
            Self::Gcp => gcp::document(provider, identity, config),
        }
    }
}

/// The credential document plus where it lives in the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedConfig {
    /// ConfigMap name
    pub name: String,
    /// ConfigMap namespace (the WorkloadIdentity's)
    pub namespace: String,
    /// Data key, also the file name inside the mount
    pub key: String,
    /// The credential document
    pub content: String,
    /// Controller reference back to the WorkloadIdentity
    pub owner: Option<OwnerReference>,
}

impl GeneratedConfig {
    /// The `data` map of the ConfigMap
    pub fn data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.key.clone(), self.content.clone())])
    }

    /// Full ConfigMap for creation
    pub fn to_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_VALUE.to_string(),
                )])),
                owner_references: self.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(self.data()),
            ..Default::default()
        }
    }
}

/// Generate the credential configuration for a WorkloadIdentity.
///
/// Fails with [`Error::UnsupportedProviderTarget`] when the Provider's target
/// tag is not one this operator knows.
pub fn generate(
    provider: &Provider,
    identity: &WorkloadIdentity,
    config: &FederationConfig,
) -> crate::Result<GeneratedConfig> {
    let target = ProviderTarget::of(provider)?;
    Ok(GeneratedConfig {
        name: identity.config_map_name(),
        namespace: identity.namespace().unwrap_or_default(),
        key: config.config_file_name.clone(),
        content: target.document(provider, identity, config)?,
        owner: identity.controller_owner_ref(&()),
    })
}
