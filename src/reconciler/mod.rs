//! The reconciliation engine: turns one `Tunnel` object into a Cloudflare tunnel, its DNS
//! records, and the in-cluster artifacts running it.
//!
//! Every pass recomputes everything from the object and the tunnel identity and issues
//! create-or-update calls, so a pass that fails half way is simply replayed.

pub mod credentials;
pub mod dns;
pub mod routing;
pub mod store;
pub mod tunnel;
pub mod workload;
pub mod zone;

#[cfg(test)]
pub(crate) mod testing;

use crate::crd::tunnel::{Tunnel, TunnelPhase, TunnelStatus};
use crate::Error;
use dns::{hostnames_by_zone, sync_dns, DnsProvider};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use store::{ArtifactStore, ServiceLookup, StatusStore, WorkloadStore};
use tracing::{debug, info, warn};
use tunnel::{ensure_tunnel, TunnelProvider};
use workload::{ensure_workload, WorkloadSpec};

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "tunnel-ingress-controller";

/// Name, namespace and owner shared by every object derived from one `Tunnel`.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectTarget {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
}

impl ObjectTarget {
    pub fn for_tunnel(tunnel: &Tunnel) -> Result<Self, Error> {
        let namespace = tunnel.namespace().ok_or(Error::MissingNamespace("Tunnel"))?;
        let owner = tunnel.controller_owner_ref(&()).ok_or_else(|| {
            Error::ValidationError(format!("tunnel {} has no uid", tunnel.name_any()))
        })?;

        Ok(ObjectTarget {
            name: tunnel.name_any(),
            namespace,
            owner,
        })
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (NAME_LABEL.to_owned(), self.name.clone()),
            (MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned()),
        ])
    }

    pub fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: Some(vec![self.owner.clone()]),
            ..ObjectMeta::default()
        }
    }
}

/// Cloudflare side collaborators, bound to the account of the object being reconciled.
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub tunnels: &'a dyn TunnelProvider,
    pub dns: &'a dyn DnsProvider,
}

/// Cluster side collaborators.
#[derive(Clone)]
pub struct Cluster {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub workloads: Arc<dyn WorkloadStore>,
    pub services: Arc<dyn ServiceLookup>,
    pub status: Arc<dyn StatusStore>,
}

pub struct Reconciler {
    cluster: Cluster,
    default_image: String,
}

impl Reconciler {
    pub fn new(cluster: Cluster, default_image: impl Into<String>) -> Self {
        Reconciler {
            cluster,
            default_image: default_image.into(),
        }
    }

    /// Runs one pass for `tunnel`, returning the phase reached. Status is written only when
    /// it differs from what the object already carries.
    pub async fn reconcile(
        &self,
        tunnel: &Tunnel,
        account_id: &str,
        providers: Providers<'_>,
    ) -> Result<TunnelPhase, Error> {
        let target = ObjectTarget::for_tunnel(tunnel)?;
        let observed = tunnel.status.clone().unwrap_or_default();
        let mut status = TunnelStatus {
            observed_generation: tunnel.metadata.generation,
            ..observed.clone()
        };
        let mut phase = TunnelPhase::Pending;

        let result = self
            .converge(tunnel, &target, account_id, providers, &mut status, &mut phase)
            .await;

        match result {
            Ok(()) => {
                status.phase = Some(TunnelPhase::Converged);
                status.message = None;
                if status != observed {
                    self.cluster
                        .status
                        .patch_status(&target.namespace, &target.name, &status)
                        .await?;
                }
                info!(
                    name = %target.name,
                    namespace = %target.namespace,
                    tunnel_id = status.tunnel_id.as_deref().unwrap_or_default(),
                    "tunnel converged"
                );
                Ok(TunnelPhase::Converged)
            }
            Err(err) => {
                warn!(
                    name = %target.name,
                    namespace = %target.namespace,
                    phase = %phase,
                    retryable = err.is_retryable(),
                    error = %err,
                    "reconciliation failed"
                );
                status.phase = Some(if err.is_retryable() {
                    TunnelPhase::Pending
                } else {
                    phase
                });
                status.message = Some(err.to_string());
                if status != observed {
                    self.write_status(&target, &status).await;
                }
                Err(err)
            }
        }
    }

    /// Records a failure that happened before a pass could start, e.g. unreadable credentials.
    pub async fn report_failure(&self, tunnel: &Tunnel, err: &Error) {
        let Ok(target) = ObjectTarget::for_tunnel(tunnel) else {
            return;
        };
        let observed = tunnel.status.clone().unwrap_or_default();
        let status = TunnelStatus {
            phase: Some(TunnelPhase::Pending),
            message: Some(err.to_string()),
            observed_generation: tunnel.metadata.generation,
            ..observed.clone()
        };
        if status != observed {
            self.write_status(&target, &status).await;
        }
    }

    async fn converge(
        &self,
        tunnel: &Tunnel,
        target: &ObjectTarget,
        account_id: &str,
        providers: Providers<'_>,
        status: &mut TunnelStatus,
        phase: &mut TunnelPhase,
    ) -> Result<(), Error> {
        if tunnel.spec.tunnel_name.trim().is_empty() {
            return Err(Error::ValidationError("tunnelName must not be empty".into()));
        }
        let zones = hostnames_by_zone(tunnel.hostnames())?;

        *phase = TunnelPhase::TunnelResolving;
        let identity = ensure_tunnel(providers.tunnels, account_id, &tunnel.spec.tunnel_name).await?;
        if status.tunnel_id.as_deref() != Some(identity.id.as_str()) {
            status.tunnel_id = Some(identity.id.clone());
            status.phase = Some(TunnelPhase::TunnelResolving);
            self.cluster
                .status
                .patch_status(&target.namespace, &target.name, status)
                .await?;
            info!(name = %target.name, tunnel_id = %identity.id, "recorded tunnel id");
        }

        *phase = TunnelPhase::ArtifactsSyncing;
        let bundle = credentials::build_credential_bundle(account_id, &identity);
        let applied =
            credentials::materialize_credential(self.cluster.artifacts.as_ref(), target, &bundle)
                .await?;
        debug!(name = %target.name, ?applied, "credential secret");

        let document = routing::build_routing_document(
            &tunnel.spec.ingress,
            &target.namespace,
            &identity,
            self.cluster.services.as_ref(),
        )
        .await?;
        let applied = routing::materialize_routing_document(
            self.cluster.artifacts.as_ref(),
            target,
            &document,
        )
        .await?;
        debug!(name = %target.name, ?applied, rules = document.ingress.len(), "routing config map");

        // A zone that fails is reported once the workload is in place.
        let mut dns_failure = None;
        for (zone, hostnames) in &zones {
            match sync_dns(providers.dns, zone, hostnames, &identity).await {
                Ok(summary) => debug!(
                    name = %target.name,
                    zone = %zone,
                    created = summary.created,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    "dns synced"
                ),
                Err(err) => {
                    warn!(name = %target.name, zone = %zone, error = %err, "dns sync failed");
                    dns_failure.get_or_insert(err);
                }
            }
        }

        *phase = TunnelPhase::WorkloadSyncing;
        let spec = WorkloadSpec {
            image: tunnel
                .spec
                .image
                .clone()
                .unwrap_or_else(|| self.default_image.clone()),
            credential_secret: target.name.clone(),
            routing_config_map: target.name.clone(),
        };
        ensure_workload(self.cluster.workloads.as_ref(), target, &spec).await?;

        if let Some(err) = dns_failure {
            *phase = TunnelPhase::ArtifactsSyncing;
            return Err(err);
        }
        Ok(())
    }

    async fn write_status(&self, target: &ObjectTarget, status: &TunnelStatus) {
        if let Err(err) = self
            .cluster
            .status
            .patch_status(&target.namespace, &target.name, status)
            .await
        {
            warn!(name = %target.name, namespace = %target.namespace, error = %err, "failed to write status");
        }
    }
}
