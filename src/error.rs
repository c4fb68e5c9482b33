use crate::cloudflare::ApiFailure;
use reqwest::StatusCode;

/// All errors possible to occur during reconciliation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("missing namespace for resource {0}")]
    MissingNamespace(&'static str),
    #[error("Missing credentials CRD {0}")]
    MissingCredentials(String),
    #[error("invalid hostname {0:?}: expected at least two labels")]
    InvalidHostname(String),
    #[error("zone {0} does not exist")]
    ZoneNotFound(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider rejected credentials: {0}")]
    AuthError(String),
    #[error("invalid tunnel spec: {0}")]
    ValidationError(String),
    #[error("failed to serialize {0}: {1}")]
    Serialization(&'static str, String),
}

impl Error {
    /// Whether a later pass can succeed without anyone touching the object or its credentials.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::ProviderUnavailable(_)
            | Error::MissingCredentials(_)
            | Error::ZoneNotFound(_) => true,
            Error::MissingNamespace(_)
            | Error::InvalidHostname(_)
            | Error::AuthError(_)
            | Error::ValidationError(_)
            | Error::Serialization(..) => false,
        }
    }
}

impl From<ApiFailure> for Error {
    fn from(failure: ApiFailure) -> Error {
        match failure {
            ApiFailure::Error(status, errors) => match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Error::AuthError(format!("{status}: {errors}"))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    Error::ProviderUnavailable(format!("rate limited: {errors}"))
                }
                status if status.is_server_error() => {
                    Error::ProviderUnavailable(format!("{status}: {errors}"))
                }
                status => Error::ValidationError(format!("{status}: {errors}")),
            },
            ApiFailure::Invalid(err) => Error::ProviderUnavailable(format!("invalid response: {err}")),
            ApiFailure::Transport(err) => Error::ProviderUnavailable(err.to_string()),
        }
    }
}
