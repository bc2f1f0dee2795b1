//! wimount - GCP workload identity federation for Kubernetes Deployments
//!
//! A `WorkloadIdentity` asks for one Deployment to authenticate to GCP as a
//! service account, through the identity pool described by a `Provider`. The
//! controller converges each request onto two objects:
//!
//! - a ConfigMap holding the external-account credential file, created once
//! - the Deployment's pod template, patched with a projected token volume,
//!   the credential volume, their mounts and `GOOGLE_APPLICATION_CREDENTIALS`
//!
//! # Modules
//!
//! - [`crd`] - WorkloadIdentity and Provider resources
//! - [`credentials`] - credential configuration documents per provider target
//! - [`workload`] - pod template overlay planning and drift detection
//! - [`controller`] - reconciliation, Kubernetes access and trigger mapping
//! - [`webhook`] - defaulting and validating admission endpoints
//! - [`events`] - Kubernetes event publishing
//! - [`config`] - mount paths, token settings and GCP endpoints
//! - [`retry`] - backoff for start-up calls
//! - [`telemetry`] - logging initialization
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod events;
pub mod retry;
pub mod telemetry;
pub mod webhook;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label marking objects created by the controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on generated objects
pub const LABEL_MANAGED_BY_VALUE: &str = "wimount";

/// Default listen address for the admission webhook server
pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:9443";
