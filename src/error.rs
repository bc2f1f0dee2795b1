//! Error types for the wimount operator

use thiserror::Error;

/// Main error type for wimount operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A resource failed validation
    #[error("validation error: {resource}: {field}: {message}")]
    Validation {
        /// Kind of the offending resource
        resource: String,
        /// JSON path of the offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The Provider names a target type this operator cannot generate for
    #[error("unsupported provider target: {target}")]
    UnsupportedProviderTarget {
        /// The target tag as written in the Provider spec
        target: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error for a field of a resource
    pub fn validation(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported provider target error
    pub fn unsupported_target(target: impl Into<String>) -> Self {
        Self::UnsupportedProviderTarget {
            target: target.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the controller should retry this error on a timer.
    ///
    /// Spec problems (validation, unsupported target) and malformed data
    /// need a human to fix the input, so they wait for the next change.
    /// Kubernetes client errors (4xx) are terminal except for conflicts and
    /// throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(e) => kube_error_is_retryable(e),
            Self::Validation { .. } => false,
            Self::UnsupportedProviderTarget { .. } => false,
            Self::Serialization(_) => false,
            Self::Internal(_) => true,
        }
    }
}

/// Retry policy for raw Kubernetes client errors
pub fn kube_error_is_retryable(e: &kube::Error) -> bool {
    match e {
        kube::Error::Api(ae) => {
            !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
        }
        _ => true,
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: validation errors name the resource and the field
    ///
    /// Admission responses and status messages quote the error verbatim, so
    /// the field path must survive into the rendered message.
    #[test]
    fn story_validation_error_names_field() {
        let err = Error::validation("WorkloadIdentity", "spec.deployment", "must not be empty");
        let msg = err.to_string();
        assert!(msg.contains("validation error"));
        assert!(msg.contains("WorkloadIdentity"));
        assert!(msg.contains("spec.deployment"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn unsupported_target_carries_tag() {
        let err = Error::unsupported_target("azure");
        assert_eq!(err.to_string(), "unsupported provider target: azure");
        match err {
            Error::UnsupportedProviderTarget { target } => assert_eq!(target, "azure"),
            _ => panic!("Expected UnsupportedProviderTarget variant"),
        }
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[rstest]
    #[case::validation(Error::validation("Provider", "spec.target", "empty"), false)]
    #[case::unsupported_target(Error::unsupported_target("azure"), false)]
    #[case::serialization(Error::serialization("bad json"), false)]
    #[case::internal(Error::internal("oops"), true)]
    #[case::forbidden(api_error(403), false)]
    #[case::unprocessable(api_error(422), false)]
    #[case::conflict(api_error(409), true)]
    #[case::throttled(api_error(429), true)]
    #[case::server_error(api_error(500), true)]
    #[case::unavailable(api_error(503), true)]
    fn retryability(#[case] err: Error, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }
}
