use super::KubeResources;
use crate::crd::tunnel::{Tunnel, TunnelStatus};
use crate::reconciler::store::StatusStore;
use crate::Error;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;

#[async_trait]
impl StatusStore for KubeResources {
    /// Merge patch of the whole status; unset fields are cleared.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TunnelStatus,
    ) -> Result<(), Error> {
        let api: Api<Tunnel> = self.namespaced(namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
