use super::KubeResources;
use crate::reconciler::store::WorkloadStore;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::ResourceExt;

impl KubeResources {
    fn deployments(&self, deployment: &Deployment) -> Result<Api<Deployment>, Error> {
        let namespace = deployment
            .namespace()
            .ok_or(Error::MissingNamespace("Deployment"))?;
        Ok(self.namespaced(&namespace))
    }
}

#[async_trait]
impl WorkloadStore for KubeResources {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), Error> {
        self.deployments(&deployment)?
            .create(&PostParams::default(), &deployment)
            .await?;
        Ok(())
    }

    /// `deployment` must carry the resource version it was read at.
    async fn replace_deployment(&self, deployment: Deployment) -> Result<(), Error> {
        self.deployments(&deployment)?
            .replace(&deployment.name_any(), &PostParams::default(), &deployment)
            .await?;
        Ok(())
    }
}
