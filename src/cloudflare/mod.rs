use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::fmt;

pub mod auth;
pub mod dns;
pub mod tunnel;

pub use auth::Auth;

pub const DEFAULT_API_URL: &str = "https://api.cloudflare.com/client/v4";

/// Ways to authenticate against the Cloudflare v4 api.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    UserAuthKey { email: String, key: String },
    UserAuthToken { token: String },
    Service { key: String },
}

impl Credentials {
    fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Credentials::UserAuthKey { email, key } => vec![
                ("X-Auth-Email", email.clone()),
                ("X-Auth-Key", key.clone()),
            ],
            Credentials::Service { key } => vec![("X-Auth-User-Service-Key", key.clone())],
            Credentials::UserAuthToken { token } => {
                vec![("Authorization", format!("Bearer {}", token))]
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Credentials::UserAuthKey { .. } => "UserAuthKey",
            Credentials::UserAuthToken { .. } => "UserAuthToken",
            Credentials::Service { .. } => "Service",
        };
        write!(f, "Credentials::{kind}(<redacted>)")
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: u32,
    pub message: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ApiErrors {
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

impl fmt::Display for ApiErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no error details");
        }

        let messages = self
            .errors
            .iter()
            .map(|err| format!("{} ({})", err.message, err.code))
            .collect::<Vec<_>>();
        write!(f, "{}", messages.join(", "))
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResultInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Deserialize, Debug)]
pub struct ApiSuccess<ResultType> {
    pub result: ResultType,
    #[serde(default)]
    pub result_info: Option<ResultInfo>,
}

impl<T> ApiSuccess<T> {
    /// True when the api reports more pages after this one.
    pub fn has_next_page(&self) -> bool {
        self.result_info
            .map(|info| info.page < info.total_pages)
            .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiFailure {
    #[error("HTTP {0}: {1}")]
    Error(StatusCode, ApiErrors),
    #[error("invalid api response: {0}")]
    Invalid(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

pub type ApiResponse<ResultType> = Result<ApiSuccess<ResultType>, ApiFailure>;

/// Http client for the Cloudflare api. Credentials are supplied per request since every
/// Tunnel object may reference a different account.
#[derive(Clone)]
pub struct Client {
    base_url: String,
    http_client: reqwest::Client,
}

impl Client {
    pub fn try_new(base_url: &str) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http_client,
        })
    }

    /// Binds credentials to the client, producing the provider used by one reconciliation
    /// pass.
    pub fn authenticated(&self, auth: &Auth) -> AuthenticatedClient {
        AuthenticatedClient {
            client: self.clone(),
            credentials: auth.credentials.clone(),
        }
    }

    async fn request<ResultType: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ApiResponse<ResultType> {
        let mut request = self
            .http_client
            .request(method, format!("{}/{}", self.base_url, path))
            .query(query);

        if let Some(body) = body {
            request = request.json(&body);
        }

        for (k, v) in credentials.headers() {
            request = request.header(k, v);
        }

        let response = request.send().await.map_err(ApiFailure::Transport)?;
        map_api_response(response).await
    }
}

/// A [`Client`] carrying the credentials of a single account.
#[derive(Clone)]
pub struct AuthenticatedClient {
    client: Client,
    credentials: Credentials,
}

impl AuthenticatedClient {
    async fn get<ResultType: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResponse<ResultType> {
        self.client
            .request(&self.credentials, Method::GET, path, query, None)
            .await
    }

    async fn send<ResultType: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResponse<ResultType> {
        self.client
            .request(&self.credentials, method, path, &[], Some(body))
            .await
    }
}

// If the response is 2XX and parses, return Success.
// If the response is 2XX and doesn't parse, return Invalid.
// If the response isn't 2XX, return Failure, with API errors if they were included.
async fn map_api_response<ResultType: DeserializeOwned>(
    resp: reqwest::Response,
) -> ApiResponse<ResultType> {
    let status = resp.status();
    if status.is_success() {
        let parsed: Result<ApiSuccess<ResultType>, reqwest::Error> = resp.json().await;
        match parsed {
            Ok(api_resp) => Ok(api_resp),
            Err(e) => Err(ApiFailure::Invalid(e)),
        }
    } else {
        let parsed: Result<ApiErrors, reqwest::Error> = resp.json().await;
        let errors = parsed.unwrap_or_default();
        Err(ApiFailure::Error(status, errors))
    }
}
