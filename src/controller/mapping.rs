//! Trigger mapping from watched objects back to WorkloadIdentities

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::crd::{Provider, WorkloadIdentity};

/// WorkloadIdentities whose resolved provider reference points at `provider`
pub fn identities_for_provider<'a>(
    provider: &Provider,
    identities: impl IntoIterator<Item = &'a WorkloadIdentity>,
) -> Vec<ObjectRef<WorkloadIdentity>> {
    let key = (provider.namespace().unwrap_or_default(), provider.name_any());
    identities
        .into_iter()
        .filter(|wi| wi.provider_key() == key)
        .map(ObjectRef::from_obj)
        .collect()
}

/// WorkloadIdentities targeting `deployment`
pub fn identities_for_deployment<'a>(
    deployment: &Deployment,
    identities: impl IntoIterator<Item = &'a WorkloadIdentity>,
) -> Vec<ObjectRef<WorkloadIdentity>> {
    let namespace = deployment.namespace();
    let name = deployment.name_any();
    identities
        .into_iter()
        .filter(|wi| wi.namespace() == namespace && wi.spec.deployment == name)
        .map(ObjectRef::from_obj)
        .collect()
}
