use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "cloudflare.ar2ro.io",
    version = "v1",
    kind = "Tunnel",
    doc = "Custom resource representation of a Cloudflare Tunnel and the hostnames it serves",
    status = "TunnelStatus",
    shortname = "cftunnel",
    printcolumn = r#"{"name":"Tunnel","type":"string","jsonPath":".spec.tunnelName"}"#,
    printcolumn = r#"{"name":"Tunnel ID","type":"string","jsonPath":".status.tunnelId"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    namespaced
)]
pub struct TunnelCrd {
    /// Name of the tunnel in the Cloudflare account, unique per account.
    pub tunnel_name: String,
    /// Name of the cluster scoped Credentials object used to talk to Cloudflare.
    pub credentials: String,
    /// Hostnames to route through the tunnel, in priority order.
    #[serde(default)]
    pub ingress: Vec<TunnelIngress>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelIngress {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Labels of the Services traffic for `hostname` is sent to.
    #[serde(default)]
    pub service_selector: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum TunnelPhase {
    Pending,
    TunnelResolving,
    ArtifactsSyncing,
    WorkloadSyncing,
    Converged,
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub tunnel_id: Option<String>,
    pub phase: Option<TunnelPhase>,
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
}

impl Tunnel {
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.spec
            .ingress
            .iter()
            .map(|ingress| ingress.hostname.as_str())
    }
}
