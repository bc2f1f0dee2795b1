//! Controller for WorkloadIdentity resources
//!
//! The convergence engine lives in [`identity`]; [`client`] is the cluster
//! state accessor it talks through and [`mapping`] turns Provider and
//! Deployment changes into WorkloadIdentity triggers.

pub mod client;
pub mod identity;
pub mod mapping;

pub use client::{KubeClient, KubeClientImpl};
pub use identity::{
    condition_reasons, converge, error_policy, reconcile, Context, ContextBuilder,
    ReconcileOutcome, CONTROLLER_NAME,
};
pub use mapping::{identities_for_deployment, identities_for_provider};
