use crate::reconciler::store::{Applied, WorkloadStore};
use crate::reconciler::ObjectTarget;
use crate::Error;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const DEFAULT_IMAGE: &str = "cloudflare/cloudflared:latest";
pub const CONTAINER_NAME: &str = "cloudflared";
pub const METRICS_PORT: i32 = 2000;
pub const CREDENTIALS_MOUNT_PATH: &str = "/etc/cloudflared";
pub const CONFIG_MOUNT_PATH: &str = "/etc/cloudflared/config";

const CREDENTIALS_VOLUME: &str = "tunnel-credentials";
const CONFIG_VOLUME: &str = "tunnel-config";

/// What the tunnel runner needs besides its own name and owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub image: String,
    pub credential_secret: String,
    pub routing_config_map: String,
}

fn command() -> Vec<String> {
    [
        "cloudflared",
        "tunnel",
        "--no-autoupdate",
        "--metrics",
        "0.0.0.0:2000",
        "--config",
        "/etc/cloudflared/config/config.yml",
        "run",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

fn pod_spec(spec: &WorkloadSpec) -> PodSpec {
    let probe = Probe {
        http_get: Some(HTTPGetAction {
            port: IntOrString::Int(METRICS_PORT),
            path: Some("/ready".to_owned()),
            ..HTTPGetAction::default()
        }),
        ..Probe::default()
    };

    PodSpec {
        containers: vec![Container {
            name: CONTAINER_NAME.to_owned(),
            image: Some(spec.image.clone()),
            command: Some(command()),
            liveness_probe: Some(probe),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: CREDENTIALS_VOLUME.to_owned(),
                    mount_path: CREDENTIALS_MOUNT_PATH.to_owned(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: CONFIG_VOLUME.to_owned(),
                    mount_path: CONFIG_MOUNT_PATH.to_owned(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
            ]),
            ..Container::default()
        }],
        volumes: Some(vec![
            Volume {
                name: CREDENTIALS_VOLUME.to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(spec.credential_secret.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: CONFIG_VOLUME.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: spec.routing_config_map.clone(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
        ]),
        ..PodSpec::default()
    }
}

/// The Deployment running `cloudflared` for `target`, with a single replica.
pub fn build_deployment(target: &ObjectTarget, spec: &WorkloadSpec) -> Deployment {
    Deployment {
        metadata: target.metadata(),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(target.labels()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(target.labels()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod_spec(spec)),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// The fields this controller owns on a Deployment. Anything the api server defaults is left
/// out so a round trip through the cluster compares equal.
#[derive(Debug, PartialEq)]
struct Projection<'a> {
    labels: BTreeMap<&'a str, &'a str>,
    owners: Vec<&'a OwnerReference>,
    template_labels: BTreeMap<&'a str, &'a str>,
    volumes: Vec<(&'a str, Option<&'a str>, Option<&'a str>)>,
    containers: Vec<ContainerProjection<'a>>,
}

#[derive(Debug, PartialEq)]
struct ContainerProjection<'a> {
    name: &'a str,
    image: Option<&'a str>,
    command: Option<&'a [String]>,
    args: Option<&'a [String]>,
    mounts: Vec<(&'a str, &'a str, Option<bool>)>,
    probe: Option<(Option<&'a str>, &'a IntOrString)>,
}

fn owned_labels<'a>(
    labels: Option<&'a BTreeMap<String, String>>,
    keys: &BTreeMap<String, String>,
) -> BTreeMap<&'a str, &'a str> {
    labels
        .into_iter()
        .flatten()
        .filter(|(key, _)| keys.contains_key(*key))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

impl<'a> Projection<'a> {
    fn of(deployment: &'a Deployment, owned: &BTreeMap<String, String>) -> Self {
        let template = deployment.spec.as_ref().map(|spec| &spec.template);
        let pod = template.and_then(|template| template.spec.as_ref());

        Projection {
            labels: owned_labels(deployment.metadata.labels.as_ref(), owned),
            owners: deployment
                .metadata
                .owner_references
                .iter()
                .flatten()
                .collect(),
            template_labels: owned_labels(
                template
                    .and_then(|template| template.metadata.as_ref())
                    .and_then(|metadata| metadata.labels.as_ref()),
                owned,
            ),
            volumes: pod
                .and_then(|pod| pod.volumes.as_ref())
                .into_iter()
                .flatten()
                .map(|volume| {
                    (
                        volume.name.as_str(),
                        volume
                            .secret
                            .as_ref()
                            .and_then(|secret| secret.secret_name.as_deref()),
                        volume
                            .config_map
                            .as_ref()
                            .map(|config_map| config_map.name.as_str()),
                    )
                })
                .collect(),
            containers: pod
                .map(|pod| pod.containers.iter().map(ContainerProjection::of).collect())
                .unwrap_or_default(),
        }
    }
}

impl<'a> ContainerProjection<'a> {
    fn of(container: &'a Container) -> Self {
        ContainerProjection {
            name: &container.name,
            image: container.image.as_deref(),
            command: container.command.as_deref(),
            args: container.args.as_deref(),
            mounts: container
                .volume_mounts
                .iter()
                .flatten()
                .map(|mount| (mount.name.as_str(), mount.mount_path.as_str(), mount.read_only))
                .collect(),
            probe: container
                .liveness_probe
                .as_ref()
                .and_then(|probe| probe.http_get.as_ref())
                .map(|get| (get.path.as_deref(), &get.port)),
        }
    }
}

/// Lays the owned fields of `desired` over `existing`, keeping its replica count, selector and
/// anything else set by other parties.
fn overlay(mut existing: Deployment, desired: Deployment) -> Deployment {
    existing
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.metadata.labels.unwrap_or_default());
    existing.metadata.owner_references = desired.metadata.owner_references;

    let Some(desired_spec) = desired.spec else {
        return existing;
    };
    let spec = existing.spec.get_or_insert_with(|| DeploymentSpec {
        replicas: desired_spec.replicas,
        selector: desired_spec.selector.clone(),
        ..DeploymentSpec::default()
    });

    let desired_template = desired_spec.template;
    spec.template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(
            desired_template
                .metadata
                .and_then(|metadata| metadata.labels)
                .unwrap_or_default(),
        );

    if let Some(desired_pod) = desired_template.spec {
        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        pod.volumes = desired_pod.volumes;
        pod.containers = desired_pod.containers;
    }

    existing
}

/// Creates the Deployment for `target`, or brings an existing one back in line with `spec`.
/// Nothing is written when the owned fields already match.
pub async fn ensure_workload(
    store: &dyn WorkloadStore,
    target: &ObjectTarget,
    spec: &WorkloadSpec,
) -> Result<Applied, Error> {
    let desired = build_deployment(target, spec);

    let Some(existing) = store
        .get_deployment(&target.namespace, &target.name)
        .await?
    else {
        store.create_deployment(desired).await?;
        info!(name = %target.name, namespace = %target.namespace, "created deployment");
        return Ok(Applied::Created);
    };

    let owned = target.labels();
    if Projection::of(&existing, &owned) == Projection::of(&desired, &owned) {
        debug!(name = %target.name, namespace = %target.namespace, "deployment up to date");
        return Ok(Applied::Unchanged);
    }

    store.replace_deployment(overlay(existing, desired)).await?;
    info!(name = %target.name, namespace = %target.namespace, "updated deployment");
    Ok(Applied::Updated)
}
