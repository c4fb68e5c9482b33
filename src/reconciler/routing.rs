use crate::crd::tunnel::TunnelIngress;
use crate::reconciler::store::{Applied, ArtifactStore, ServiceLookup};
use crate::reconciler::tunnel::TunnelIdentity;
use crate::reconciler::ObjectTarget;
use crate::Error;
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key of the ConfigMap entry holding the document.
pub const ROUTING_KEY: &str = "config.yml";
pub const CREDENTIALS_FILE: &str = "/etc/cloudflared/tunnel.json";
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// Configuration file of `cloudflared`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoutingDocument {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: String,
    pub ingress: Vec<IngressRule>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub service: String,
}

impl IngressRule {
    pub fn catch_all() -> Self {
        IngressRule {
            hostname: None,
            path: None,
            service: CATCH_ALL_SERVICE.to_owned(),
        }
    }
}

/// `http://<clusterIP>:<first port>`, or `None` for headless or portless Services.
pub fn service_address(service: &Service) -> Option<String> {
    let spec = service.spec.as_ref()?;
    let cluster_ip = spec
        .cluster_ip
        .as_deref()
        .filter(|ip| !ip.is_empty() && *ip != "None")?;
    let port = spec.ports.as_ref()?.first()?.port;
    Some(format!("http://{}:{}", cluster_ip, port))
}

async fn resolve_ingress(
    lookup: &dyn ServiceLookup,
    namespace: &str,
    ingress: &TunnelIngress,
) -> Result<Vec<IngressRule>, Error> {
    if ingress.service_selector.is_empty() {
        warn!(hostname = %ingress.hostname, "ingress has an empty service selector, skipping");
        return Ok(vec![]);
    }

    let services = lookup
        .find_services(namespace, &ingress.service_selector)
        .await?;
    if services.is_empty() {
        warn!(
            hostname = %ingress.hostname,
            selector = ?ingress.service_selector,
            "no service matches selector"
        );
    }

    let rules = services
        .iter()
        .filter_map(|service| match service_address(service) {
            Some(address) => Some(IngressRule {
                hostname: Some(ingress.hostname.clone()),
                path: ingress.path.clone(),
                service: address,
            }),
            None => {
                warn!(
                    hostname = %ingress.hostname,
                    service = %service.name_any(),
                    "service has no cluster ip or port, skipping"
                );
                None
            }
        })
        .collect::<Vec<_>>();

    debug!(hostname = %ingress.hostname, rules = rules.len(), "resolved ingress");
    Ok(rules)
}

/// Builds the routing document for `ingress`, in declaration order and terminated by a single
/// catch-all rule. Selectors are resolved concurrently.
pub async fn build_routing_document(
    ingress: &[TunnelIngress],
    namespace: &str,
    tunnel: &TunnelIdentity,
    lookup: &dyn ServiceLookup,
) -> Result<RoutingDocument, Error> {
    let resolved = try_join_all(
        ingress
            .iter()
            .map(|ingress| resolve_ingress(lookup, namespace, ingress)),
    )
    .await?;

    let mut rules = resolved.into_iter().flatten().collect::<Vec<_>>();
    rules.push(IngressRule::catch_all());

    Ok(RoutingDocument {
        tunnel: tunnel.id.clone(),
        credentials_file: CREDENTIALS_FILE.to_owned(),
        ingress: rules,
    })
}

pub fn routing_config_map(
    target: &ObjectTarget,
    document: &RoutingDocument,
) -> Result<ConfigMap, Error> {
    let payload = serde_yaml::to_string(document)
        .map_err(|err| Error::Serialization(ROUTING_KEY, err.to_string()))?;

    Ok(ConfigMap {
        metadata: target.metadata(),
        data: Some(BTreeMap::from([(ROUTING_KEY.to_owned(), payload)])),
        ..ConfigMap::default()
    })
}

pub async fn materialize_routing_document(
    store: &dyn ArtifactStore,
    target: &ObjectTarget,
    document: &RoutingDocument,
) -> Result<Applied, Error> {
    store
        .apply_config_map(routing_config_map(target, document)?)
        .await
}
