use crate::Error;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Raw tunnel secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelSecret(Vec<u8>);

impl TunnelSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|err| Error::ValidationError(format!("malformed tunnel secret: {err}")))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TunnelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TunnelSecret(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSummary {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelIdentity {
    pub id: String,
    pub secret: TunnelSecret,
    pub name: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Lists the tunnels of an account that have not been deleted.
    async fn list_tunnels(&self, account_id: &str) -> Result<Vec<TunnelSummary>, Error>;

    /// Creates a tunnel, returning the identity the provider acknowledged.
    async fn create_tunnel(&self, account_id: &str, name: &str)
        -> Result<TunnelIdentity, Error>;

    /// Fetches the secret of an existing tunnel.
    async fn tunnel_secret(&self, account_id: &str, tunnel_id: &str)
        -> Result<TunnelSecret, Error>;
}

/// Returns the tunnel named `name`, creating it when the account has none.
///
/// An existing tunnel keeps its secret: it is read back from the provider, never
/// regenerated, so credential bundles already deployed stay valid.
pub async fn ensure_tunnel(
    provider: &dyn TunnelProvider,
    account_id: &str,
    name: &str,
) -> Result<TunnelIdentity, Error> {
    let existing = provider
        .list_tunnels(account_id)
        .await?
        .into_iter()
        .find(|tunnel| tunnel.name == name);

    match existing {
        Some(tunnel) => {
            debug!(tunnel_id = %tunnel.id, tunnel = name, "found existing tunnel");
            let secret = provider.tunnel_secret(account_id, &tunnel.id).await?;
            Ok(TunnelIdentity {
                id: tunnel.id,
                secret,
                name: tunnel.name,
            })
        }
        None => {
            let identity = provider.create_tunnel(account_id, name).await?;
            info!(tunnel_id = %identity.id, tunnel = name, "created tunnel");
            Ok(identity)
        }
    }
}
