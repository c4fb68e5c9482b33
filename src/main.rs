use clap::Parser;
use kube::Client as K8sClient;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnel_ingress_controller::cloudflare::Client as CloudflareClient;
use tunnel_ingress_controller::config::{Config, LogFormat};
use tunnel_ingress_controller::controllers::TunnelController;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let kubernetes_client = K8sClient::try_default().await?;
    let cloudflare_client = CloudflareClient::try_new(&config.cloudflare_api_url)?;

    TunnelController::new(kubernetes_client, cloudflare_client, config).await
}
