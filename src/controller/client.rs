//! Cluster state accessor
//!
//! Everything the convergence engine reads or writes goes through
//! [`KubeClient`], so the engine can be exercised against mocks and
//! in-memory fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Provider, WorkloadIdentity, WorkloadIdentityStatus};
use crate::workload::WorkloadOverlay;
use crate::Error;

/// Trait abstracting the Kubernetes operations of the convergence engine
///
/// Reads return `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a WorkloadIdentity
    async fn get_workload_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadIdentity>, Error>;

    /// Read a Provider
    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>, Error>;

    /// Read a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap
    ///
    /// Returns `false` when it already existed; that is not an error.
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<bool, Error>;

    /// Set the `data` of an existing ConfigMap with a merge patch
    async fn fill_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Read a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Server-side apply the overlay onto a Deployment, forcing ownership
    async fn apply_workload_overlay(
        &self,
        namespace: &str,
        name: &str,
        overlay: &WorkloadOverlay,
        field_manager: &str,
    ) -> Result<(), Error>;

    /// Replace the status of a WorkloadIdentity
    async fn patch_identity_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WorkloadIdentityStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_workload_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadIdentity>, Error> {
        let api: Api<WorkloadIdentity> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>, Error> {
        let api: Api<Provider> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<bool, Error> {
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal("ConfigMap has no namespace"))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        match api.create(&PostParams::default(), config_map).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(
                    name = ?config_map.metadata.name,
                    "ConfigMap already exists, created concurrently"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fill_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "data": data });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_workload_overlay(
        &self,
        namespace: &str,
        name: &str,
        overlay: &WorkloadOverlay,
        field_manager: &str,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let body = overlay.to_apply_body(name, namespace)?;
        api.patch(
            name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(&body),
        )
        .await?;
        Ok(())
    }

    async fn patch_identity_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WorkloadIdentityStatus,
    ) -> Result<(), Error> {
        let api: Api<WorkloadIdentity> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}
