//! Capabilities the engine needs from the cluster. Implemented against the Kubernetes api in
//! [`crate::resources`] and by in-memory fakes in tests.

use crate::crd::tunnel::TunnelStatus;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;

/// Outcome of a create-or-update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Create-or-update of named artifacts. An update overwrites the stored payload; nothing is
/// merged.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn apply_secret(&self, secret: Secret) -> Result<Applied, Error>;

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<Applied, Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), Error>;

    async fn replace_deployment(&self, deployment: Deployment) -> Result<(), Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    /// Services of `namespace` carrying every label of `selector`.
    async fn find_services(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TunnelStatus,
    ) -> Result<(), Error>;
}
