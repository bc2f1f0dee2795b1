//! Custom Resource Definitions for wimount
//!
//! Two namespaced resources in `wimount.dev/v1alpha1`: the
//! [`WorkloadIdentity`] intent and the [`Provider`] it references.

mod provider;
mod types;
mod workload_identity;

pub use provider::{Provider, ProviderSpec, ProviderStatus, ProjectRef, DEFAULT_LOCATION};
pub use types::{Condition, ConditionStatus};
pub use workload_identity::{
    ProviderRef, WorkloadIdentity, WorkloadIdentitySpec, WorkloadIdentityStatus, READY_CONDITION,
};
