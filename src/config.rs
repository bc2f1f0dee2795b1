//! Federation configuration
//!
//! Every path, file name, volume name and endpoint the generator and planner
//! emit lives in one immutable [`FederationConfig`]. The binary builds it once
//! from the CLI and hands it to the controller context; nothing else reads
//! ambient constants.

use std::time::Duration;

/// Default field manager identity for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "wimount";

/// Default delay before re-checking a missing Provider or Deployment
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(600);

/// Immutable configuration shared by the generator, planner and engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationConfig {
    /// Directory the projected service account token is mounted at
    pub token_mount_dir: String,
    /// File name of the token inside the token volume
    pub token_path: String,
    /// Name of the projected token volume
    pub token_volume_name: String,
    /// Lifetime requested for the projected token, in seconds
    pub token_expiration_seconds: i64,
    /// Directory the generated credential configuration is mounted at
    pub config_mount_dir: String,
    /// Key of the credential document inside the ConfigMap
    pub config_file_name: String,
    /// Environment variable pointing client libraries at the document
    pub credentials_env_var: String,
    /// Field manager used for every server-side apply
    pub field_manager: String,
    /// Delay before re-checking missing dependencies
    pub retry_interval: Duration,
    /// GCP endpoints embedded in the generated document
    pub gcp: GcpEndpoints,
}

/// Fixed GCP endpoints used by the `gcp` provider target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcpEndpoints {
    /// Universe domain written into the credential document
    pub universe_domain: String,
    /// Authority hosting workload identity pools
    pub iam_authority: String,
    /// Security token service exchange endpoint
    pub token_url: String,
    /// Base URL of the IAM credentials API used for impersonation
    pub iam_credentials_url: String,
}

impl Default for GcpEndpoints {
    fn default() -> Self {
        Self {
            universe_domain: "googleapis.com".to_string(),
            iam_authority: "iam.googleapis.com".to_string(),
            token_url: "https://sts.googleapis.com/v1/token".to_string(),
            iam_credentials_url: "https://iamcredentials.googleapis.com/v1".to_string(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            token_mount_dir: "/var/run/wimount-gcp-service-account/".to_string(),
            token_path: "token".to_string(),
            token_volume_name: "wimount-gcp-token".to_string(),
            token_expiration_seconds: 3600,
            config_mount_dir: "/etc/wimount-gcp-workload-identity/".to_string(),
            config_file_name: "gcp-credential-configuration.json".to_string(),
            credentials_env_var: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            gcp: GcpEndpoints::default(),
        }
    }
}

impl FederationConfig {
    /// Override the field manager identity
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Override the missing-dependency retry interval
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Absolute path of the projected token file
    pub fn token_file(&self) -> String {
        join_path(&self.token_mount_dir, &self.token_path)
    }

    /// Absolute path of the credential document inside the pod
    pub fn config_file(&self) -> String {
        join_path(&self.config_mount_dir, &self.config_file_name)
    }
}

fn join_path(dir: &str, file: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_mount_surface() {
        let config = FederationConfig::default();
        assert_eq!(
            config.token_file(),
            "/var/run/wimount-gcp-service-account/token"
        );
        assert_eq!(
            config.config_file(),
            "/etc/wimount-gcp-workload-identity/gcp-credential-configuration.json"
        );
        assert_eq!(config.field_manager, "wimount");
        assert_eq!(config.retry_interval, Duration::from_secs(600));
        assert_eq!(config.token_expiration_seconds, 3600);
    }

    #[test]
    fn builders_override_runtime_knobs() {
        let config = FederationConfig::default()
            .with_field_manager("custom")
            .with_retry_interval(Duration::from_secs(5));
        assert_eq!(config.field_manager, "custom");
        assert_eq!(config.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn join_path_tolerates_missing_trailing_slash() {
        assert_eq!(join_path("/a/b", "c"), "/a/b/c");
        assert_eq!(join_path("/a/b/", "c"), "/a/b/c");
    }
}
