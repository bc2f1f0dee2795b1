//! Kubernetes Events recorded on WorkloadIdentity objects
//!
//! A failed publish is logged and dropped; it never fails the reconcile.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::crd::WorkloadIdentity;

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// The credential ConfigMap was created
    pub const CONFIG_GENERATED: &str = "ConfigGenerated";
    /// The Deployment pod template was patched
    pub const WORKLOAD_PATCHED: &str = "WorkloadPatched";
    /// The Provider names an unsupported target
    pub const UNSUPPORTED_PROVIDER_TARGET: &str = "UnsupportedProviderTarget";
}

const ACTION: &str = "Reconcile";

/// Something a WorkloadIdentity owner should see in `kubectl describe`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityEvent {
    /// The credential ConfigMap was written
    ConfigGenerated {
        /// ConfigMap name
        config_map: String,
    },
    /// The overlay was applied to the Deployment
    WorkloadPatched {
        /// Deployment name
        deployment: String,
    },
    /// The Provider's target cannot be served
    UnsupportedProviderTarget {
        /// Error text
        message: String,
    },
}

impl IdentityEvent {
    /// REASON column value
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConfigGenerated { .. } => reasons::CONFIG_GENERATED,
            Self::WorkloadPatched { .. } => reasons::WORKLOAD_PATCHED,
            Self::UnsupportedProviderTarget { .. } => reasons::UNSUPPORTED_PROVIDER_TARGET,
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            Self::UnsupportedProviderTarget { .. } => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    fn note(&self) -> String {
        match self {
            Self::ConfigGenerated { config_map } => {
                format!("Generated credential configuration {config_map}")
            }
            Self::WorkloadPatched { deployment } => {
                format!("Mounted workload identity credentials into Deployment {deployment}")
            }
            Self::UnsupportedProviderTarget { message } => message.clone(),
        }
    }
}

/// Sink for [`IdentityEvent`]s
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` on `identity`
    async fn publish(&self, identity: &WorkloadIdentity, event: IdentityEvent);
}

/// Publishes through the kube-runtime event [`Recorder`]
pub struct RecorderPublisher {
    recorder: Recorder,
}

impl RecorderPublisher {
    /// Report as `controller`; the instance is the pod name when known
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for RecorderPublisher {
    async fn publish(&self, identity: &WorkloadIdentity, event: IdentityEvent) {
        let reason = event.reason();
        let k8s_event = Event {
            type_: event.event_type(),
            reason: reason.to_string(),
            note: Some(event.note()),
            action: ACTION.to_string(),
            secondary: None,
        };
        let target = identity.object_ref(&());
        if let Err(e) = self.recorder.publish(&k8s_event, &target).await {
            warn!(identity = %identity.name_any(), reason, error = %e, "dropping event");
        }
    }
}

/// Drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _identity: &WorkloadIdentity, _event: IdentityEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_target_is_a_warning() {
        let event = IdentityEvent::UnsupportedProviderTarget {
            message: "unsupported provider target: aws".to_string(),
        };
        assert_eq!(event.event_type(), EventType::Warning);
        assert_eq!(event.reason(), reasons::UNSUPPORTED_PROVIDER_TARGET);
        assert_eq!(event.note(), "unsupported provider target: aws");
    }

    #[test]
    fn progress_events_are_normal() {
        let patched = IdentityEvent::WorkloadPatched {
            deployment: "web".to_string(),
        };
        assert_eq!(patched.event_type(), EventType::Normal);
        assert!(patched.note().ends_with("Deployment web"));

        let generated = IdentityEvent::ConfigGenerated {
            config_map: "wimount-wi-web-conf".to_string(),
        };
        assert_eq!(generated.reason(), reasons::CONFIG_GENERATED);
    }
}
