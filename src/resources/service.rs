use super::KubeResources;
use crate::reconciler::store::ServiceLookup;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams};
use std::collections::BTreeMap;

/// Equality based label selector, `k1=v1,k2=v2`.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ServiceLookup for KubeResources {
    async fn find_services(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, Error> {
        if selector.is_empty() {
            return Ok(vec![]);
        }

        let api: Api<Service> = self.namespaced(namespace);
        let services = api
            .list(&ListParams::default().labels(&label_selector(selector)))
            .await?;
        Ok(services.items)
    }
}
