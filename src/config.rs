use crate::cloudflare::DEFAULT_API_URL;
use crate::reconciler::workload::DEFAULT_IMAGE;
use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Runtime settings of the controller binary.
#[derive(Parser, Clone, Debug)]
#[command(name = "controller", about = "Exposes cluster services through Cloudflare tunnels")]
#[command(version)]
pub struct Config {
    /// Seconds between two passes over a converged object
    #[arg(long, env = "RESYNC_INTERVAL", default_value_t = 60)]
    pub resync_interval: u64,

    /// Seconds to wait after the first retryable failure
    #[arg(long, env = "ERROR_BACKOFF_BASE", default_value_t = 5)]
    pub error_backoff_base: u64,

    /// Upper bound in seconds for the retry delay
    #[arg(long, env = "ERROR_BACKOFF_MAX", default_value_t = 300)]
    pub error_backoff_max: u64,

    /// Objects reconciled at the same time
    #[arg(long, env = "CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Image running cloudflared when a Tunnel does not name one
    #[arg(long, env = "TUNNEL_IMAGE", default_value = DEFAULT_IMAGE)]
    pub tunnel_image: String,

    #[arg(long, env = "CLOUDFLARE_API_URL", default_value = DEFAULT_API_URL)]
    pub cloudflare_api_url: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval)
    }

    /// Delay before retry number `attempt` (starting at 0): doubles from the base, capped at
    /// the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let secs = self
            .error_backoff_base
            .saturating_mul(factor)
            .min(self.error_backoff_max);
        Duration::from_secs(secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["controller"])
    }
}
