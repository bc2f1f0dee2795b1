//! GCP workload identity federation credential configuration
//!
//! Produces the `external_account` document understood by Google client
//! libraries. The subject token is the projected service account token the
//! planner mounts into every container.

use serde::Serialize;

use crate::config::FederationConfig;
use crate::crd::{Provider, WorkloadIdentity};

const CREDENTIAL_TYPE: &str = "external_account";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
const TOKEN_FORMAT: &str = "text";

/// Field order is the serialization order.
#[derive(Debug, Serialize)]
struct ExternalAccount<'a> {
    universe_domain: &'a str,
    #[serde(rename = "type")]
    type_: &'static str,
    audience: String,
    subject_token_type: &'static str,
    token_url: &'a str,
    credential_source: CredentialSource,
    service_account_impersonation_url: String,
}

#[derive(Debug, Serialize)]
struct CredentialSource {
    file: String,
    format: TokenFormat,
}

#[derive(Debug, Serialize)]
struct TokenFormat {
    #[serde(rename = "type")]
    type_: &'static str,
}

/// Resource path of the pool provider, shared by both audiences
fn provider_resource(provider: &Provider) -> String {
    let spec = &provider.spec;
    format!(
        "projects/{}/locations/{}/workloadIdentityPools/{}/providers/{}",
        spec.project.number,
        spec.effective_location(),
        spec.pool_id,
        spec.provider_id
    )
}

/// STS audience written into the credential document
pub(crate) fn audience(provider: &Provider, config: &FederationConfig) -> String {
    format!(
        "//{}/{}",
        config.gcp.iam_authority,
        provider_resource(provider)
    )
}

/// Audience requested for the projected service account token
pub(crate) fn token_audience(provider: &Provider, config: &FederationConfig) -> String {
    format!(
        "https://{}/{}",
        config.gcp.iam_authority,
        provider_resource(provider)
    )
}

pub(crate) fn document(
    provider: &Provider,
    identity: &WorkloadIdentity,
    config: &FederationConfig,
) -> crate::Result<String> {
    let doc = ExternalAccount {
        universe_domain: &config.gcp.universe_domain,
        type_: CREDENTIAL_TYPE,
        audience: audience(provider, config),
        subject_token_type: SUBJECT_TOKEN_TYPE,
        token_url: &config.gcp.token_url,
        credential_source: CredentialSource {
            file: config.token_file(),
            format: TokenFormat {
                type_: TOKEN_FORMAT,
            },
        },
        service_account_impersonation_url: format!(
            "{}/projects/-/serviceAccounts/{}:generateAccessToken",
            config.gcp.iam_credentials_url, identity.spec.target_service_account
        ),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}
