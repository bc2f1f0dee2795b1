//! Admission webhooks for wimount resources
//!
//! Defaulting (mutating) and validating endpoints for WorkloadIdentity and
//! Provider, served over TLS next to the controller.

pub mod admission;

use std::net::SocketAddr;
use std::path::Path;

use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use json_patch::PatchOperation;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use crate::Error;

type Review = AdmissionReview<DynamicObject>;

/// Create the webhook router with all admission endpoints
///
/// - POST /mutate/workloadidentities
/// - POST /validate/workloadidentities
/// - POST /mutate/providers
/// - POST /validate/providers
/// - GET /healthz
pub fn webhook_router() -> Router {
    Router::new()
        .route(
            "/mutate/workloadidentities",
            post(mutate_workload_identity),
        )
        .route(
            "/validate/workloadidentities",
            post(validate_workload_identity),
        )
        .route("/mutate/providers", post(mutate_provider))
        .route("/validate/providers", post(validate_provider))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve the webhook router over TLS until the process exits
pub async fn serve(addr: SocketAddr, cert: &Path, key: &Path) -> Result<(), Error> {
    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| Error::internal(format!("webhook TLS config error: {e}")))?;

    info!(%addr, "starting admission webhook server");
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router().into_make_service())
        .await
        .map_err(|e| Error::internal(format!("webhook server error: {e}")))
}

fn parse(body: Review) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

fn mutate(
    body: Review,
    defaults: impl FnOnce(&AdmissionRequest<DynamicObject>, &DynamicObject) -> Vec<PatchOperation>,
) -> Json<Review> {
    let req = match parse(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp.into_review()),
    };
    let Some(obj) = req.object.as_ref() else {
        return Json(AdmissionResponse::from(&req).into_review());
    };

    let ops = defaults(&req, obj);
    if ops.is_empty() {
        return Json(AdmissionResponse::from(&req).into_review());
    }

    debug!(uid = %req.uid, kind = %req.kind.kind, ops = ops.len(), "applying defaults");
    let response = match AdmissionResponse::from(&req).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "failed to serialize patch");
            AdmissionResponse::from(&req).deny(format!("patch serialization error: {e}"))
        }
    };
    Json(response.into_review())
}

fn validate(body: Review, check: impl FnOnce(&DynamicObject) -> Result<(), Error>) -> Json<Review> {
    let req = match parse(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp.into_review()),
    };
    if req.operation == Operation::Delete {
        return Json(AdmissionResponse::from(&req).into_review());
    }
    let Some(obj) = req.object.as_ref() else {
        return Json(AdmissionResponse::from(&req).into_review());
    };

    let response = match check(obj) {
        Ok(()) => AdmissionResponse::from(&req),
        Err(e) => {
            warn!(uid = %req.uid, kind = %req.kind.kind, error = %e, "denying admission");
            AdmissionResponse::from(&req).deny(e.to_string())
        }
    };
    Json(response.into_review())
}

async fn mutate_workload_identity(Json(body): Json<Review>) -> Json<Review> {
    mutate(body, |req, obj| {
        let namespace = req
            .namespace
            .clone()
            .or_else(|| obj.metadata.namespace.clone())
            .unwrap_or_default();
        admission::workload_identity_defaults(obj, &namespace)
    })
}

async fn validate_workload_identity(Json(body): Json<Review>) -> Json<Review> {
    validate(body, admission::validate_workload_identity)
}

async fn mutate_provider(Json(body): Json<Review>) -> Json<Review> {
    mutate(body, |_, obj| admission::provider_defaults(obj))
}

async fn validate_provider(Json(body): Json<Review>) -> Json<Review> {
    validate(body, admission::validate_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn review(operation: &str, kind: &str, resource: &str, spec: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "uid-1",
                "kind": {"group": "wimount.dev", "version": "v1alpha1", "kind": kind},
                "resource": {"group": "wimount.dev", "version": "v1alpha1", "resource": resource},
                "name": "obj",
                "namespace": "apps",
                "operation": operation,
                "userInfo": {},
                "object": {
                    "apiVersion": "wimount.dev/v1alpha1",
                    "kind": kind,
                    "metadata": {"name": "obj", "namespace": "apps"},
                    "spec": spec
                }
            }
        })
    }

    async fn post_review(path: &str, body: Value) -> Value {
        let response = webhook_router()
            .oneshot(
                Request::post(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// The response carries the patch as raw bytes of a JSON document
    fn decode_patch(resp: &Value) -> json_patch::Patch {
        let bytes: Vec<u8> = serde_json::from_value(resp["response"]["patch"].clone()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Story: creating a WorkloadIdentity without a provider namespace
    ///
    /// The mutating webhook answers with a JSON patch adding the namespace.
    #[tokio::test]
    async fn story_mutating_webhook_returns_namespace_patch() {
        let body = review(
            "CREATE",
            "WorkloadIdentity",
            "workloadidentities",
            json!({"deployment": "web", "targetServiceAccount": "sa@x", "provider": {"name": "gcp"}}),
        );

        let resp = post_review("/mutate/workloadidentities", body).await;

        assert_eq!(resp["response"]["allowed"], true);
        assert_eq!(resp["response"]["patchType"], "JSONPatch");
        let patch = decode_patch(&resp);
        assert_eq!(patch.0.len(), 1);
        let PatchOperation::Add(op) = &patch.0[0] else {
            panic!("expected an add operation, got {:?}", patch.0[0]);
        };
        assert_eq!(op.path.to_string(), "/spec/provider/namespace");
        assert_eq!(op.value, json!("apps"));
    }

    #[tokio::test]
    async fn identity_with_namespace_gets_no_patch() {
        let body = review(
            "CREATE",
            "WorkloadIdentity",
            "workloadidentities",
            json!({"deployment": "web", "targetServiceAccount": "sa@x", "provider": {"name": "gcp", "namespace": "shared"}}),
        );

        let resp = post_review("/mutate/workloadidentities", body).await;

        assert_eq!(resp["response"]["allowed"], true);
        assert!(resp["response"].get("patch").map_or(true, Value::is_null));
    }

    #[tokio::test]
    async fn invalid_provider_is_denied_with_field() {
        let body = review(
            "CREATE",
            "Provider",
            "providers",
            json!({"target": "gcp", "poolID": "", "providerID": "p", "project": {"name": "n", "number": "1"}}),
        );

        let resp = post_review("/validate/providers", body).await;

        assert_eq!(resp["response"]["allowed"], false);
        assert!(resp["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("spec.poolID"));
    }

    #[tokio::test]
    async fn deletes_are_always_allowed() {
        let body = review(
            "DELETE",
            "Provider",
            "providers",
            json!({"target": ""}),
        );

        let resp = post_review("/validate/providers", body).await;

        assert_eq!(resp["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn valid_identity_is_allowed() {
        let body = review(
            "UPDATE",
            "WorkloadIdentity",
            "workloadidentities",
            json!({"deployment": "web", "targetServiceAccount": "sa@x", "provider": {"name": "gcp", "namespace": "apps"}}),
        );

        let resp = post_review("/validate/workloadidentities", body).await;

        assert_eq!(resp["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn healthz_responds() {
        let response = webhook_router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
