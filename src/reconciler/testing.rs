//! In-memory collaborators for engine tests. Every fake records the writes it receives.

use crate::crd::tunnel::{Tunnel, TunnelCrd, TunnelIngress, TunnelStatus};
use crate::reconciler::dns::{CnameParams, DnsProvider, DnsRecord, Zone};
use crate::reconciler::store::{Applied, ArtifactStore, ServiceLookup, StatusStore, WorkloadStore};
use crate::reconciler::tunnel::{TunnelIdentity, TunnelProvider, TunnelSecret, TunnelSummary};
use crate::reconciler::zone::hostname_to_zone;
use crate::reconciler::ObjectTarget;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const TUNNEL_UID: &str = "5b3c9a7e-0f41-4f0e-9d7a-3f1f2c1d0a11";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

pub fn identity(id: &str, name: &str) -> TunnelIdentity {
    TunnelIdentity {
        id: id.to_owned(),
        secret: TunnelSecret::new(format!("{id}-secret").into_bytes()),
        name: name.to_owned(),
    }
}

pub fn owner(name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "cloudflare.ar2ro.io/v1".to_owned(),
        kind: "Tunnel".to_owned(),
        name: name.to_owned(),
        uid: TUNNEL_UID.to_owned(),
        controller: Some(true),
        block_owner_deletion: None,
    }
}

pub fn target(name: &str, namespace: &str) -> ObjectTarget {
    ObjectTarget {
        name: name.to_owned(),
        namespace: namespace.to_owned(),
        owner: owner(name),
    }
}

pub fn ingress(hostname: &str, selector: &[(&str, &str)]) -> TunnelIngress {
    TunnelIngress {
        hostname: hostname.to_owned(),
        path: None,
        service_selector: selector
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn service(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    cluster_ip: &str,
    port: i32,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some(cluster_ip.to_owned()),
            ports: Some(vec![ServicePort {
                port,
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// A `Tunnel` named `name` as the api server would hand it out: with uid and generation.
pub fn tunnel(name: &str, namespace: &str, ingress: Vec<TunnelIngress>) -> Tunnel {
    let mut tunnel = Tunnel::new(
        name,
        TunnelCrd {
            tunnel_name: name.to_owned(),
            credentials: "default".to_owned(),
            ingress,
            image: None,
        },
    );
    tunnel.metadata.namespace = Some(namespace.to_owned());
    tunnel.metadata.uid = Some(TUNNEL_UID.to_owned());
    tunnel.metadata.generation = Some(1);
    tunnel
}

#[derive(Default)]
pub struct FakeTunnelProvider {
    tunnels: Mutex<Vec<(TunnelSummary, TunnelSecret)>>,
    creates: AtomicUsize,
}

impl FakeTunnelProvider {
    /// Adds an existing tunnel, returning its id.
    pub fn seed(&self, name: &str, secret: &[u8]) -> String {
        let mut tunnels = self.tunnels.lock().unwrap();
        let id = format!("tunnel-{}", tunnels.len() + 1);
        tunnels.push((
            TunnelSummary {
                id: id.clone(),
                name: name.to_owned(),
            },
            TunnelSecret::new(secret.to_vec()),
        ));
        id
    }

    pub fn id_of(&self, name: &str) -> Option<String> {
        self.tunnels
            .lock()
            .unwrap()
            .iter()
            .find(|(summary, _)| summary.name == name)
            .map(|(summary, _)| summary.id.clone())
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnelProvider {
    async fn list_tunnels(&self, _account_id: &str) -> Result<Vec<TunnelSummary>, Error> {
        Ok(self
            .tunnels
            .lock()
            .unwrap()
            .iter()
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn create_tunnel(&self, _account_id: &str, name: &str) -> Result<TunnelIdentity, Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let secret = format!("{name}-generated-secret").into_bytes();
        let id = self.seed(name, &secret);
        Ok(TunnelIdentity {
            id,
            secret: TunnelSecret::new(secret),
            name: name.to_owned(),
        })
    }

    async fn tunnel_secret(&self, _account_id: &str, tunnel_id: &str) -> Result<TunnelSecret, Error> {
        self.tunnels
            .lock()
            .unwrap()
            .iter()
            .find(|(summary, _)| summary.id == tunnel_id)
            .map(|(_, secret)| secret.clone())
            .ok_or_else(|| Error::ValidationError(format!("tunnel {tunnel_id} not found")))
    }
}

#[derive(Default)]
pub struct FakeDnsProvider {
    zones: Mutex<Vec<Zone>>,
    records: Mutex<Vec<DnsRecord>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl FakeDnsProvider {
    pub fn with_zone(name: &str) -> Self {
        let provider = Self::default();
        provider.add_zone(name);
        provider
    }

    pub fn add_zone(&self, name: &str) {
        self.zones.lock().unwrap().push(Zone {
            id: format!("zone-{name}"),
            name: name.to_owned(),
        });
    }

    /// Adds a CNAME record, returning its id.
    pub fn seed_record(&self, name: &str, content: &str, proxied: bool) -> String {
        let zone = hostname_to_zone(name).unwrap();
        let mut records = self.records.lock().unwrap();
        let id = format!("record-{}", records.len() + 1);
        records.push(DnsRecord {
            id: id.clone(),
            name: name.to_owned(),
            content: content.to_owned(),
            ttl: 1,
            proxied,
            zone_id: Some(format!("zone-{zone}")),
        });
        id
    }

    pub fn record(&self, name: &str) -> Option<DnsRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|record| record.name == name)
            .cloned()
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for FakeDnsProvider {
    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, Error> {
        Ok(self
            .zones
            .lock()
            .unwrap()
            .iter()
            .find(|zone| zone.name == name)
            .cloned())
    }

    async fn list_cname_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, Error> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.zone_id.as_deref() == Some(zone_id))
            .cloned()
            .collect())
    }

    async fn create_cname(&self, zone_id: &str, params: &CnameParams) -> Result<DnsRecord, Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = DnsRecord {
            id: format!("record-{}", records.len() + 1),
            name: params.name.clone(),
            content: params.content.clone(),
            ttl: params.ttl,
            proxied: params.proxied,
            zone_id: Some(zone_id.to_owned()),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn update_cname(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &CnameParams,
    ) -> Result<DnsRecord, Error> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|record| record.id == record_id && record.zone_id.as_deref() == Some(zone_id))
            .ok_or_else(|| Error::ValidationError(format!("record {record_id} not found")))?;
        record.name = params.name.clone();
        record.content = params.content.clone();
        record.ttl = params.ttl;
        record.proxied = params.proxied;
        Ok(record.clone())
    }
}

#[derive(Default)]
pub struct FakeArtifactStore {
    secrets: Mutex<BTreeMap<Key, Secret>>,
    config_maps: Mutex<BTreeMap<Key, ConfigMap>>,
    created: AtomicUsize,
    updated: AtomicUsize,
}

impl FakeArtifactStore {
    fn apply<K: Clone + PartialEq + ResourceExt>(
        &self,
        objects: &Mutex<BTreeMap<Key, K>>,
        object: K,
    ) -> Result<Applied, Error> {
        let namespace = object.namespace().ok_or(Error::MissingNamespace("artifact"))?;
        let mut objects = objects.lock().unwrap();
        let applied = match objects.get(&key(&namespace, &object.name_any())) {
            None => Applied::Created,
            Some(existing) if *existing == object => return Ok(Applied::Unchanged),
            Some(_) => Applied::Updated,
        };

        match applied {
            Applied::Created => self.created.fetch_add(1, Ordering::SeqCst),
            _ => self.updated.fetch_add(1, Ordering::SeqCst),
        };
        objects.insert(key(&namespace, &object.name_any()), object);
        Ok(applied)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn apply_secret(&self, secret: Secret) -> Result<Applied, Error> {
        self.apply(&self.secrets, secret)
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<Applied, Error> {
        self.apply(&self.config_maps, config_map)
    }
}

#[derive(Default)]
pub struct FakeWorkloadStore {
    deployments: Mutex<BTreeMap<Key, Deployment>>,
    creates: AtomicUsize,
    replaces: AtomicUsize,
}

impl FakeWorkloadStore {
    /// Stores a Deployment without counting it as a write.
    pub fn insert(&self, deployment: Deployment) {
        let key = key(
            deployment.metadata.namespace.as_deref().unwrap_or_default(),
            deployment.metadata.name.as_deref().unwrap_or_default(),
        );
        self.deployments.lock().unwrap().insert(key, deployment);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn replace_calls(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadStore for FakeWorkloadStore {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(namespace, name))
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.insert(deployment);
        Ok(())
    }

    async fn replace_deployment(&self, deployment: Deployment) -> Result<(), Error> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.insert(deployment);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeServiceLookup {
    services: Mutex<Vec<Service>>,
}

impl FakeServiceLookup {
    pub fn add(&self, service: Service) {
        self.services.lock().unwrap().push(service);
    }
}

#[async_trait]
impl ServiceLookup for FakeServiceLookup {
    async fn find_services(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, Error> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|service| service.namespace().as_deref() == Some(namespace))
            .filter(|service| {
                let labels = service.labels();
                selector
                    .iter()
                    .all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeStatusStore {
    statuses: Mutex<BTreeMap<Key, TunnelStatus>>,
    patches: AtomicUsize,
}

impl FakeStatusStore {
    pub fn status(&self, namespace: &str, name: &str) -> Option<TunnelStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn patch_calls(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusStore for FakeStatusStore {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TunnelStatus,
    ) -> Result<(), Error> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .insert(key(namespace, name), status.clone());
        Ok(())
    }
}
