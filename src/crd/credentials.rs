use crate::cloudflare::Auth;
use crate::Error;
use kube::Api;
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AuthKind {
    UserAuthToken(String),
    UserAuthKey { email: String, key: String },
    ServiceKey(String),
}

impl std::fmt::Debug for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            AuthKind::UserAuthToken(_) => "UserAuthToken",
            AuthKind::UserAuthKey { .. } => "UserAuthKey",
            AuthKind::ServiceKey(_) => "ServiceKey",
        };
        write!(f, "{kind}(<redacted>)")
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "cloudflare.ar2ro.io",
    version = "v1",
    kind = "Credentials",
    plural = "credentials",
    singular = "credentials",
    doc = "Custom resource representation of Cloudflare Credentials",
    derive = "PartialEq"
)]
pub struct CredentialsCrd {
    pub account_id: String,
    pub auth: AuthKind,
}

#[allow(async_fn_in_trait)]
pub trait CredentialsApiExt {
    async fn get_credentials(&self, name: &str) -> Result<Auth, Error>;
}

impl CredentialsApiExt for Api<Credentials> {
    async fn get_credentials(&self, name: &str) -> Result<Auth, Error> {
        match self.get_opt(name).await.map_err(Error::KubeError)? {
            Some(credentials) => Ok(credentials.into()),
            None => Err(Error::MissingCredentials(name.to_string())),
        }
    }
}
