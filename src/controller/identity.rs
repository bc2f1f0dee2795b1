//! WorkloadIdentity controller implementation
//!
//! [`converge`] drives one WorkloadIdentity toward its desired state:
//! fetch the intent, resolve its Provider, create the credential ConfigMap
//! if it is missing, then server-side apply the workload overlay when the
//! Deployment drifted from it. Every step is idempotent, so the engine is
//! safe to re-run on duplicate or out-of-order triggers.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, KubeClientImpl};
use crate::config::FederationConfig;
use crate::credentials;
use crate::crd::{
    Condition, ConditionStatus, Provider, WorkloadIdentity, WorkloadIdentityStatus,
    READY_CONDITION,
};
use crate::events::{EventPublisher, IdentityEvent, RecorderPublisher};
use crate::workload;
use crate::Error;

/// Requeue delay for retryable reconcile errors
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Controller name reported on Events
pub const CONTROLLER_NAME: &str = "wimount-controller";

/// Ready condition reasons
pub mod condition_reasons {
    /// Config generated and workload patched
    pub const CONVERGED: &str = "Converged";
    /// Referenced Provider does not exist yet
    pub const PROVIDER_NOT_FOUND: &str = "ProviderNotFound";
    /// Target Deployment does not exist yet
    pub const WORKLOAD_NOT_FOUND: &str = "WorkloadNotFound";
    /// Provider target is not supported
    pub const UNSUPPORTED_PROVIDER_TARGET: &str = "UnsupportedProviderTarget";
    /// Any other failure
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Result of a single convergence attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The WorkloadIdentity no longer exists
    IntentGone,
    /// The referenced Provider does not exist
    WaitingForProvider,
    /// The target Deployment does not exist
    WaitingForWorkload,
    /// Config and workload match the desired state
    Converged {
        /// The ConfigMap was created or filled in this attempt
        config_created: bool,
        /// The Deployment was patched in this attempt
        workload_patched: bool,
    },
}

impl ReconcileOutcome {
    /// Map the outcome to a controller action
    pub fn action(&self, retry_interval: Duration) -> Action {
        match self {
            Self::IntentGone | Self::Converged { .. } => Action::await_change(),
            Self::WaitingForProvider | Self::WaitingForWorkload => Action::requeue(retry_interval),
        }
    }
}

/// Controller context shared across reconciliations
pub struct Context {
    /// Cluster state accessor
    pub kube: Arc<dyn KubeClient>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Paths, names and timings
    pub config: FederationConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Assemble a context from explicit parts
    pub fn from_parts(
        kube: Arc<dyn KubeClient>,
        events: Arc<dyn EventPublisher>,
        config: FederationConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    /// Create a context for testing with a mock client and no Events
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self::from_parts(
            kube,
            Arc::new(crate::events::NoopEventPublisher),
            FederationConfig::default(),
        )
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(FederationConfig::default().with_field_manager("wimount"))
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: FederationConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            config: FederationConfig::default(),
        }
    }

    /// Set the federation config
    pub fn config(mut self, config: FederationConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the Event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(RecorderPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            config: self.config,
        }
    }
}

/// Reconcile a WorkloadIdentity
///
/// Adapter between the kube-runtime controller and [`converge`]: the
/// outcome becomes an [`Action`], errors go to [`error_policy`].
#[instrument(skip(identity, ctx), fields(identity = %identity.name_any()))]
pub async fn reconcile(identity: Arc<WorkloadIdentity>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = identity
        .namespace()
        .ok_or_else(|| Error::internal("WorkloadIdentity has no namespace"))?;
    let outcome = converge(&namespace, &identity.name_any(), &ctx).await?;
    debug!(?outcome, "reconcile finished");
    Ok(outcome.action(ctx.config.retry_interval))
}

/// Requeue retryable errors shortly; wait for a spec change otherwise
pub fn error_policy(identity: Arc<WorkloadIdentity>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        error!(
            %error,
            identity = %identity.name_any(),
            "reconciliation failed, retrying"
        );
        Action::requeue(ERROR_REQUEUE)
    } else {
        warn!(
            %error,
            identity = %identity.name_any(),
            "reconciliation failed, waiting for a change"
        );
        Action::await_change()
    }
}

/// Run one convergence attempt for the WorkloadIdentity `namespace/name`.
///
/// Records the outcome as the Ready condition unless the intent is gone.
pub async fn converge(
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    let Some(identity) = ctx.kube.get_workload_identity(namespace, name).await? else {
        debug!(namespace, name, "WorkloadIdentity is gone");
        return Ok(ReconcileOutcome::IntentGone);
    };

    let result = converge_identity(&identity, ctx).await;

    match &result {
        Ok(outcome) => report_status(&identity, Ok(outcome), ctx).await?,
        Err(e) => {
            if matches!(e, Error::UnsupportedProviderTarget { .. }) {
                let event = IdentityEvent::UnsupportedProviderTarget {
                    message: e.to_string(),
                };
                ctx.events.publish(&identity, event).await;
            }
            if let Err(status_err) = report_status(&identity, Err(e), ctx).await {
                warn!(error = %status_err, "failed to record failure on status");
            }
        }
    }

    result
}

async fn converge_identity(
    identity: &WorkloadIdentity,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    identity.spec.validate()?;
    let namespace = identity.namespace().unwrap_or_default();

    let (provider_ns, provider_name) = identity.provider_key();
    let Some(provider) = ctx.kube.get_provider(&provider_ns, &provider_name).await? else {
        info!(
            provider = %format!("{provider_ns}/{provider_name}"),
            retry_in = ?ctx.config.retry_interval,
            "Provider not found, retrying later"
        );
        return Ok(ReconcileOutcome::WaitingForProvider);
    };
    provider.spec.validate()?;

    let config_created = reconcile_config(identity, &provider, ctx).await?;

    let deployment_name = &identity.spec.deployment;
    let Some(deployment) = ctx.kube.get_deployment(&namespace, deployment_name).await? else {
        info!(
            deployment = %deployment_name,
            retry_in = ?ctx.config.retry_interval,
            "Deployment not found, retrying later"
        );
        return Ok(ReconcileOutcome::WaitingForWorkload);
    };

    let workload_patched = reconcile_workload(identity, &provider, &deployment, ctx).await?;

    Ok(ReconcileOutcome::Converged {
        config_created,
        workload_patched,
    })
}

/// Create the credential ConfigMap if it is missing or empty.
///
/// Existing content is never rewritten.
async fn reconcile_config(
    identity: &WorkloadIdentity,
    provider: &Provider,
    ctx: &Context,
) -> Result<bool, Error> {
    let namespace = identity.namespace().unwrap_or_default();
    let name = identity.config_map_name();

    let existing = ctx.kube.get_config_map(&namespace, &name).await?;
    if existing
        .as_ref()
        .and_then(|cm| cm.data.as_ref())
        .is_some_and(|data| !data.is_empty())
    {
        debug!(config_map = %name, "credential config already present");
        return Ok(false);
    }

    let generated = credentials::generate(provider, identity, &ctx.config)?;

    let written = if existing.is_some() {
        ctx.kube
            .fill_config_map(&namespace, &name, &generated.data())
            .await?;
        true
    } else {
        ctx.kube
            .create_config_map(&generated.to_config_map())
            .await?
    };

    if written {
        info!(config_map = %name, "generated credential config");
        let event = IdentityEvent::ConfigGenerated { config_map: name };
        ctx.events.publish(identity, event).await;
    }
    Ok(written)
}

/// Apply the overlay when the live pod template drifted from it.
async fn reconcile_workload(
    identity: &WorkloadIdentity,
    provider: &Provider,
    deployment: &k8s_openapi::api::apps::v1::Deployment,
    ctx: &Context,
) -> Result<bool, Error> {
    let namespace = identity.namespace().unwrap_or_default();
    let deployment_name = &identity.spec.deployment;
    let template = deployment
        .spec
        .as_ref()
        .map(|s| s.template.clone())
        .unwrap_or_default();

    let overlay = workload::plan(
        &template,
        provider,
        identity,
        &identity.config_map_name(),
        &ctx.config,
    )?;

    if overlay.is_applied_to(&template) {
        debug!(deployment = %deployment_name, "workload already converged");
        return Ok(false);
    }

    ctx.kube
        .apply_workload_overlay(
            &namespace,
            deployment_name,
            &overlay,
            &ctx.config.field_manager,
        )
        .await?;

    info!(
        deployment = %deployment_name,
        containers = overlay.containers.len(),
        "patched workload pod template"
    );
    let event = IdentityEvent::WorkloadPatched {
        deployment: deployment_name.clone(),
    };
    ctx.events.publish(identity, event).await;
    Ok(true)
}

fn ready_condition(
    identity: &WorkloadIdentity,
    result: Result<&ReconcileOutcome, &Error>,
) -> Option<Condition> {
    let (status, reason, message) = match result {
        Ok(ReconcileOutcome::IntentGone) => return None,
        Ok(ReconcileOutcome::Converged { .. }) => (
            ConditionStatus::True,
            condition_reasons::CONVERGED,
            format!(
                "Credentials mounted into Deployment {}",
                identity.spec.deployment
            ),
        ),
        Ok(ReconcileOutcome::WaitingForProvider) => {
            let (ns, name) = identity.provider_key();
            (
                ConditionStatus::False,
                condition_reasons::PROVIDER_NOT_FOUND,
                format!("Provider {ns}/{name} not found"),
            )
        }
        Ok(ReconcileOutcome::WaitingForWorkload) => (
            ConditionStatus::False,
            condition_reasons::WORKLOAD_NOT_FOUND,
            format!("Deployment {} not found", identity.spec.deployment),
        ),
        Err(e) if matches!(e, Error::UnsupportedProviderTarget { .. }) => (
            ConditionStatus::False,
            condition_reasons::UNSUPPORTED_PROVIDER_TARGET,
            e.to_string(),
        ),
        Err(e) => (
            ConditionStatus::False,
            condition_reasons::RECONCILE_FAILED,
            e.to_string(),
        ),
    };
    Some(Condition::new(READY_CONDITION, status, reason, message))
}

/// Write the Ready condition when it differs from the current one
async fn report_status(
    identity: &WorkloadIdentity,
    result: Result<&ReconcileOutcome, &Error>,
    ctx: &Context,
) -> Result<(), Error> {
    let Some(condition) = ready_condition(identity, result) else {
        return Ok(());
    };

    let generation = identity.meta().generation;
    let unchanged = identity
        .ready_condition()
        .is_some_and(|current| current.same_state(&condition))
        && identity
            .status
            .as_ref()
            .is_some_and(|s| s.observed_generation == generation);
    if unchanged {
        return Ok(());
    }

    let status = identity
        .status
        .clone()
        .unwrap_or_default()
        .condition(condition)
        .observed_generation(generation);

    ctx.kube
        .patch_identity_status(
            &identity.namespace().unwrap_or_default(),
            &identity.name_any(),
            &status,
        )
        .await
}
