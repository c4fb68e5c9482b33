use crate::cloudflare::AuthenticatedClient;
use crate::reconciler::tunnel::{TunnelIdentity, TunnelProvider, TunnelSecret, TunnelSummary};
use crate::Error;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const PAGE_SIZE: u32 = 100;

#[derive(Deserialize, Debug)]
struct CfdTunnel {
    id: String,
    name: String,
    #[serde(default)]
    credentials_file: Option<CredentialsFile>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "TunnelSecret")]
    tunnel_secret: String,
}

impl std::fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialsFile(<redacted>)")
    }
}

/// Payload of a tunnel token: base64 of `{"a": account, "t": tunnel id, "s": secret}`.
#[derive(Deserialize)]
struct TunnelToken {
    #[serde(rename = "s")]
    secret: String,
}

pub(crate) fn decode_tunnel_token(token: &str) -> Result<TunnelSecret, Error> {
    let payload = STANDARD
        .decode(token.trim())
        .map_err(|err| Error::ValidationError(format!("malformed tunnel token: {err}")))?;
    let token: TunnelToken = serde_json::from_slice(&payload)
        .map_err(|err| Error::ValidationError(format!("malformed tunnel token: {err}")))?;
    TunnelSecret::from_base64(&token.secret)
}

// 32 bytes drawn from the OS rng through two v4 uuids.
fn generate_secret() -> TunnelSecret {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    TunnelSecret::new(bytes)
}

#[async_trait]
impl TunnelProvider for AuthenticatedClient {
    async fn list_tunnels(&self, account_id: &str) -> Result<Vec<TunnelSummary>, Error> {
        let path = format!("accounts/{}/cfd_tunnel", account_id);
        let mut tunnels = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("is_deleted", "false".to_owned()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            let response = self.get::<Vec<CfdTunnel>>(&path, &query).await?;
            let has_next_page = response.has_next_page();

            tunnels.extend(
                response
                    .result
                    .into_iter()
                    .map(|tunnel| TunnelSummary {
                        id: tunnel.id,
                        name: tunnel.name,
                    }),
            );

            if !has_next_page {
                break;
            }
            page += 1;
        }

        Ok(tunnels)
    }

    async fn create_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<TunnelIdentity, Error> {
        let submitted = generate_secret();
        let body = json!({
            "name": name,
            "tunnel_secret": submitted.to_base64(),
            "config_src": "local",
        });

        let tunnel = self
            .send::<CfdTunnel>(Method::POST, &format!("accounts/{}/cfd_tunnel", account_id), body)
            .await?
            .result;

        let secret = match tunnel.credentials_file {
            Some(file) => TunnelSecret::from_base64(&file.tunnel_secret)?,
            None => submitted,
        };

        Ok(TunnelIdentity {
            id: tunnel.id,
            secret,
            name: tunnel.name,
        })
    }

    async fn tunnel_secret(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<TunnelSecret, Error> {
        let path = format!("accounts/{}/cfd_tunnel/{}/token", account_id, tunnel_id);
        let token = self.get::<String>(&path, &[]).await?.result;
        decode_tunnel_token(&token)
    }
}
