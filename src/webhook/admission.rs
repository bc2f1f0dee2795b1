//! Defaulting and validation rules for wimount resources
//!
//! Works on the raw admitted object so that defaulting can tell an absent
//! field from one filled in by serde defaults.

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::crd::{ProviderSpec, WorkloadIdentitySpec, DEFAULT_LOCATION};
use crate::Error;

fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Patch filling `spec.provider.namespace` with the object's namespace
pub fn workload_identity_defaults(obj: &DynamicObject, namespace: &str) -> Vec<PatchOperation> {
    let Some(provider) = obj.data.pointer("/spec/provider").and_then(Value::as_object) else {
        return Vec::new();
    };
    if !is_unset(provider.get("namespace")) || namespace.is_empty() {
        return Vec::new();
    }
    vec![PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["spec", "provider", "namespace"]),
        value: Value::String(namespace.to_string()),
    })]
}

/// Patch filling `spec.location` with `global`
pub fn provider_defaults(obj: &DynamicObject) -> Vec<PatchOperation> {
    let Some(spec) = obj.data.get("spec").and_then(Value::as_object) else {
        return Vec::new();
    };
    if !is_unset(spec.get("location")) {
        return Vec::new();
    }
    vec![PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["spec", "location"]),
        value: Value::String(DEFAULT_LOCATION.to_string()),
    })]
}

fn spec_of<T: DeserializeOwned>(obj: &DynamicObject, kind: &str) -> Result<T, Error> {
    let spec = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| Error::validation(kind, "spec", "spec is required"))?;
    serde_json::from_value(spec).map_err(|e| Error::validation(kind, "spec", e.to_string()))
}

/// Reject WorkloadIdentities missing a required field
pub fn validate_workload_identity(obj: &DynamicObject) -> Result<(), Error> {
    spec_of::<WorkloadIdentitySpec>(obj, "WorkloadIdentity")?.validate()
}

/// Reject Providers missing a required field
pub fn validate_provider(obj: &DynamicObject) -> Result<(), Error> {
    spec_of::<ProviderSpec>(obj, "Provider")?.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ApiResource;
    use kube::core::GroupVersionKind;
    use serde_json::json;

    fn dynamic(kind: &str, spec: Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("wimount.dev", "v1alpha1", kind);
        let mut obj = DynamicObject::new("obj", &ApiResource::from_gvk(&gvk)).within("apps");
        obj.data = json!({ "spec": spec });
        obj
    }

    fn patched(obj: &DynamicObject, ops: Vec<PatchOperation>) -> Value {
        let mut doc = obj.data.clone();
        json_patch::patch(&mut doc, &ops).unwrap();
        doc
    }

    mod workload_identity {
        use super::*;

        fn spec(provider: Value) -> Value {
            json!({
                "deployment": "web",
                "targetServiceAccount": "sa@x",
                "provider": provider
            })
        }

        /// Story: an omitted provider namespace is filled at admission
        #[test]
        fn story_missing_namespace_is_defaulted() {
            let obj = dynamic("WorkloadIdentity", spec(json!({"name": "gcp"})));
            let ops = workload_identity_defaults(&obj, "apps");

            assert_eq!(ops.len(), 1);
            assert_eq!(patched(&obj, ops)["spec"]["provider"]["namespace"], "apps");
        }

        #[test]
        fn empty_namespace_is_defaulted() {
            let obj = dynamic(
                "WorkloadIdentity",
                spec(json!({"name": "gcp", "namespace": ""})),
            );
            let ops = workload_identity_defaults(&obj, "apps");
            assert_eq!(patched(&obj, ops)["spec"]["provider"]["namespace"], "apps");
        }

        #[test]
        fn explicit_namespace_is_kept() {
            let obj = dynamic(
                "WorkloadIdentity",
                spec(json!({"name": "gcp", "namespace": "shared"})),
            );
            assert!(workload_identity_defaults(&obj, "apps").is_empty());
        }

        #[test]
        fn missing_provider_is_left_to_validation() {
            let obj = dynamic("WorkloadIdentity", json!({"deployment": "web"}));
            assert!(workload_identity_defaults(&obj, "apps").is_empty());
        }

        #[test]
        fn validation_names_offending_field() {
            let obj = dynamic(
                "WorkloadIdentity",
                json!({"deployment": "web", "targetServiceAccount": "", "provider": {"name": "gcp"}}),
            );
            let err = validate_workload_identity(&obj).unwrap_err();
            assert!(err.to_string().contains("spec.targetServiceAccount"));
        }

        #[test]
        fn missing_required_field_fails_to_parse() {
            let obj = dynamic("WorkloadIdentity", json!({"deployment": "web"}));
            assert!(matches!(
                validate_workload_identity(&obj),
                Err(Error::Validation { .. })
            ));
        }

        #[test]
        fn complete_identity_is_valid() {
            let obj = dynamic("WorkloadIdentity", spec(json!({"name": "gcp"})));
            assert!(validate_workload_identity(&obj).is_ok());
        }
    }

    mod provider {
        use super::*;

        fn spec() -> Value {
            json!({
                "target": "gcp",
                "poolID": "pool-1",
                "providerID": "prov-1",
                "project": {"name": "my-project", "number": "12345"}
            })
        }

        #[test]
        fn missing_location_defaults_to_global() {
            let obj = dynamic("Provider", spec());
            let ops = provider_defaults(&obj);
            assert_eq!(patched(&obj, ops)["spec"]["location"], "global");
        }

        #[test]
        fn explicit_location_is_kept() {
            let mut s = spec();
            s["location"] = json!("europe-west1");
            assert!(provider_defaults(&dynamic("Provider", s)).is_empty());
        }

        #[test]
        fn empty_project_number_is_rejected() {
            let mut s = spec();
            s["project"]["number"] = json!("");
            let err = validate_provider(&dynamic("Provider", s)).unwrap_err();
            assert!(err.to_string().contains("spec.project.number"));
        }

        #[test]
        fn complete_provider_is_valid() {
            assert!(validate_provider(&dynamic("Provider", spec())).is_ok());
        }
    }
}
