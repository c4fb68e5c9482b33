//! Kubernetes backed implementations of the engine's cluster capabilities.

use crate::reconciler::store::{Applied, ArtifactStore};
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

pub mod configmap;
pub mod deployment;
pub mod secret;
pub mod service;
pub mod status;

/// Cluster access for the reconciler, one client shared by every capability.
#[derive(Clone)]
pub struct KubeResources {
    client: Client,
}

impl KubeResources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// True when every label of `wanted` is set on `existing` with the same value.
pub(crate) fn has_labels(
    existing: Option<&BTreeMap<String, String>>,
    wanted: Option<&BTreeMap<String, String>>,
) -> bool {
    let existing = existing.cloned().unwrap_or_default();
    wanted
        .into_iter()
        .flatten()
        .all(|(key, value)| existing.get(key) == Some(value))
}

/// Create-or-update of `object`. `unchanged` decides whether the stored copy already carries
/// everything `object` sets; an update replaces the stored copy, keeping labels set by others.
pub(crate) async fn apply<K>(
    api: &Api<K>,
    mut object: K,
    unchanged: impl Fn(&K, &K) -> bool,
) -> Result<Applied, Error>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    let name = object.name_any();
    let Some(existing) = api.get_opt(&name).await? else {
        api.create(&PostParams::default(), &object).await?;
        debug!(name = %name, kind = %K::kind(&K::DynamicType::default()), "created");
        return Ok(Applied::Created);
    };

    if unchanged(&existing, &object) {
        return Ok(Applied::Unchanged);
    }

    let mut labels = existing.labels().clone();
    labels.extend(object.labels().clone());
    let meta = object.meta_mut();
    meta.labels = Some(labels);
    meta.resource_version = existing.resource_version();

    api.replace(&name, &PostParams::default(), &object).await?;
    debug!(name = %name, kind = %K::kind(&K::DynamicType::default()), "replaced");
    Ok(Applied::Updated)
}

#[async_trait]
impl ArtifactStore for KubeResources {
    async fn apply_secret(&self, secret: Secret) -> Result<Applied, Error> {
        let namespace = secret.namespace().ok_or(Error::MissingNamespace("Secret"))?;
        apply(&self.namespaced(&namespace), secret, secret::unchanged).await
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<Applied, Error> {
        let namespace = config_map
            .namespace()
            .ok_or(Error::MissingNamespace("ConfigMap"))?;
        apply(&self.namespaced(&namespace), config_map, configmap::unchanged).await
    }
}
