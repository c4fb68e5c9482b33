use crate::cloudflare::Client as CloudflareClient;
use crate::config::Config;
use crate::crd::credentials::{Credentials, CredentialsApiExt};
use crate::crd::tunnel::Tunnel;
use crate::reconciler::{Cluster, Providers, Reconciler, MANAGED_BY, MANAGED_BY_LABEL};
use crate::resources::KubeResources;
use crate::Error;
use futures::{Future, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{
    client::Client, runtime::watcher, runtime::Controller as KubeController, Api, ResourceExt,
};
use std::collections::HashMap;
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Delay before looking for a Credentials object that does not exist yet.
const MISSING_CREDENTIALS_REQUEUE: u64 = 120;

pub struct TunnelController(Arc<Context>);

pub struct Context {
    pub kubernetes_client: Client,
    pub cloudflare_client: CloudflareClient,
    pub credentials_api: Api<Credentials>,
    pub tunnel_api: Api<Tunnel>,
    pub reconciler: Reconciler,
    pub config: Config,
    failures: Failures,
}

struct Failure {
    attempts: u32,
    generation: Option<i64>,
    retry_at: Instant,
}

/// Consecutive failed passes per Tunnel and when the next one is due.
#[derive(Default)]
struct Failures(Mutex<HashMap<ObjectRef<Tunnel>, Failure>>);

impl Failures {
    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectRef<Tunnel>, Failure>> {
        self.0.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Records a failed pass and returns the delay `backoff` picks from the number of failures
    /// before it. A new generation starts counting from zero.
    fn record(
        &self,
        key: ObjectRef<Tunnel>,
        generation: Option<i64>,
        backoff: impl FnOnce(u32) -> Duration,
    ) -> Duration {
        let mut failures = self.lock();
        let previous = failures
            .get(&key)
            .filter(|failure| failure.generation == generation)
            .map_or(0, |failure| failure.attempts);
        let delay = backoff(previous);
        failures.insert(
            key,
            Failure {
                attempts: previous.saturating_add(1),
                generation,
                retry_at: Instant::now() + delay,
            },
        );
        delay
    }

    /// Time left before `key` is due again, or `None` when it is due or its spec changed.
    fn remaining(&self, key: &ObjectRef<Tunnel>, generation: Option<i64>) -> Option<Duration> {
        let failures = self.lock();
        let failure = failures.get(key)?;
        if failure.generation != generation {
            return None;
        }
        let remaining = failure.retry_at.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    fn clear(&self, key: &ObjectRef<Tunnel>) {
        self.lock().remove(key);
    }

    /// Drops entries of objects that no longer exist.
    fn retain(&self, exists: impl Fn(&ObjectRef<Tunnel>) -> bool) {
        self.lock().retain(|key, _| exists(key));
    }
}

impl Context {
    pub fn new(client: Client, cloudflare_client: CloudflareClient, config: Config) -> Self {
        let resources = Arc::new(KubeResources::new(client.clone()));
        let cluster = Cluster {
            artifacts: resources.clone(),
            workloads: resources.clone(),
            services: resources.clone(),
            status: resources,
        };

        Self {
            credentials_api: Api::all(client.clone()),
            tunnel_api: Api::all(client.clone()),
            kubernetes_client: client,
            cloudflare_client,
            reconciler: Reconciler::new(cluster, config.tunnel_image.clone()),
            config,
            failures: Failures::default(),
        }
    }
}

#[instrument(skip_all, fields(name = %tunnel.name_any(), namespace = ?tunnel.namespace()))]
pub async fn reconciler(tunnel: Arc<Tunnel>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectRef::from_obj(tunnel.as_ref());
    // Our own status writes wake the object up; keep waiting out the backoff.
    if let Some(remaining) = ctx.failures.remaining(&key, tunnel.metadata.generation) {
        debug!(?remaining, "backing off, skipping pass");
        return Ok(Action::requeue(remaining));
    }

    let auth = match ctx
        .credentials_api
        .get_credentials(&tunnel.spec.credentials)
        .await
    {
        Ok(auth) => auth,
        Err(err) => {
            ctx.reconciler.report_failure(&tunnel, &err).await;
            return Err(err);
        }
    };

    let client = ctx.cloudflare_client.authenticated(&auth);
    let providers = Providers {
        tunnels: &client,
        dns: &client,
    };
    let phase = ctx
        .reconciler
        .reconcile(&tunnel, &auth.account_id, providers)
        .await?;

    ctx.failures.clear(&key);
    debug!(%phase, "pass finished");
    Ok(Action::requeue(ctx.config.resync_interval()))
}

pub fn on_err(tunnel: Arc<Tunnel>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(tunnel.as_ref());
    let generation = tunnel.metadata.generation;
    match error {
        Error::MissingCredentials(name) => {
            warn!(
                credentials = %name,
                "missing credentials, requeuing in {} seconds",
                MISSING_CREDENTIALS_REQUEUE
            );
            let delay = ctx.failures.record(key, generation, |_| {
                Duration::from_secs(MISSING_CREDENTIALS_REQUEUE)
            });
            Action::requeue(delay)
        }
        err if err.is_retryable() => {
            let delay = ctx
                .failures
                .record(key, generation, |attempts| ctx.config.backoff(attempts));
            warn!(error = %err, delay = ?delay, "retryable failure, requeuing");
            Action::requeue(delay)
        }
        err => {
            ctx.failures.clear(&key);
            error!(error = %err, "reconciliation failed, waiting for the object to change");
            Action::await_change()
        }
    }
}

impl TunnelController {
    pub fn new(client: Client, cloudflare_client: CloudflareClient, config: Config) -> Self {
        Self(Arc::new(Context::new(client, cloudflare_client, config)))
    }

    pub async fn start(self) -> anyhow::Result<()> {
        info!(concurrency = self.0.config.concurrency, "starting tunnel controller");
        let client = self.0.kubernetes_client.clone();
        let managed = watcher::Config::default()
            .labels(&format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY));

        let controller =
            KubeController::new(self.0.tunnel_api.clone(), watcher::Config::default())
                .owns(Api::<Deployment>::all(client.clone()), managed.clone())
                .owns(Api::<ConfigMap>::all(client.clone()), managed.clone())
                .owns(Api::<Secret>::all(client), managed)
                .with_config(
                    controller::Config::default().concurrency(self.0.config.concurrency),
                )
                .shutdown_on_signal();
        let tunnels: Store<Tunnel> = controller.store();

        controller
            .run(reconciler, on_err, self.0.clone())
            .for_each(|result| {
                match result {
                    Ok((object, _)) => debug!(
                        name = %object.name,
                        namespace = ?object.namespace,
                        "reconciled tunnel"
                    ),
                    Err(err) => debug!(error = %err, "tunnel reconciliation errored"),
                }
                self.0.failures.retain(|key| tunnels.get(key).is_some());
                futures::future::ready(())
            })
            .await;

        info!("tunnel controller stopped");
        Ok(())
    }
}

impl IntoFuture for TunnelController {
    type Output = anyhow::Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.start())
    }
}
