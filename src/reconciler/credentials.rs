use crate::reconciler::store::{Applied, ArtifactStore};
use crate::reconciler::tunnel::TunnelIdentity;
use crate::reconciler::ObjectTarget;
use crate::Error;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of the Secret entry holding the bundle.
pub const CREDENTIALS_KEY: &str = "tunnel.json";

/// The credentials file `cloudflared` reads to authenticate as a tunnel.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    #[serde(rename = "AccountTag")]
    pub account_tag: String,
    #[serde(rename = "TunnelSecret")]
    pub tunnel_secret: String,
    #[serde(rename = "TunnelID")]
    pub tunnel_id: String,
    #[serde(rename = "TunnelName")]
    pub tunnel_name: String,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("account_tag", &self.account_tag)
            .field("tunnel_secret", &"<redacted>")
            .field("tunnel_id", &self.tunnel_id)
            .field("tunnel_name", &self.tunnel_name)
            .finish()
    }
}

pub fn build_credential_bundle(account_id: &str, tunnel: &TunnelIdentity) -> CredentialBundle {
    CredentialBundle {
        account_tag: account_id.to_owned(),
        tunnel_secret: tunnel.secret.to_base64(),
        tunnel_id: tunnel.id.clone(),
        tunnel_name: tunnel.name.clone(),
    }
}

pub fn credential_secret(target: &ObjectTarget, bundle: &CredentialBundle) -> Result<Secret, Error> {
    let payload = serde_json::to_vec(bundle)
        .map_err(|err| Error::Serialization(CREDENTIALS_KEY, err.to_string()))?;

    Ok(Secret {
        metadata: target.metadata(),
        type_: Some("Opaque".to_owned()),
        data: Some(BTreeMap::from([(
            CREDENTIALS_KEY.to_owned(),
            ByteString(payload),
        )])),
        ..Secret::default()
    })
}

/// Writes the bundle into the Secret named after the target. The stored payload is replaced
/// wholesale.
pub async fn materialize_credential(
    store: &dyn ArtifactStore,
    target: &ObjectTarget,
    bundle: &CredentialBundle,
) -> Result<Applied, Error> {
    store.apply_secret(credential_secret(target, bundle)?).await
}
