use clap::Parser;
use std::path::PathBuf;

use crate::config::Overrides;

/// Pull a new image, replace the running service, wait for it to become
/// healthy and apply the schema migration.
#[derive(Parser, Debug)]
#[command(name = "redeploy", version, about = "Redeploy a compose service on this host")]
pub struct Cli {
    /// Path to redeploy.toml (optional when everything is set via flags/env)
    #[arg(short, long, env = "REDEPLOY_CONFIG", default_value = "redeploy.toml")]
    pub config: PathBuf,

    /// Image reference to deploy, e.g. registry.example.com/acme/api:v2
    #[arg(long, env = "REDEPLOY_IMAGE")]
    pub image: Option<String>,

    /// Replace only the tag of the configured image
    #[arg(long, env = "REDEPLOY_TAG")]
    pub tag: Option<String>,

    /// Compose service to redeploy
    #[arg(long, env = "REDEPLOY_SERVICE")]
    pub service: Option<String>,

    /// HTTP liveness URL; any 2xx counts as healthy
    #[arg(long, env = "REDEPLOY_HEALTH_URL")]
    pub health_url: Option<String>,

    /// Seconds between health probes
    #[arg(long, env = "REDEPLOY_HEALTH_INTERVAL")]
    pub interval: Option<u64>,

    /// Health probes before giving up
    #[arg(long, env = "REDEPLOY_HEALTH_RETRIES")]
    pub max_attempts: Option<u32>,

    /// Do not run the configured migration
    #[arg(long, env = "REDEPLOY_SKIP_MIGRATION")]
    pub skip_migration: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            image: self.image.clone(),
            tag: self.tag.clone(),
            service: self.service.clone(),
            health_url: self.health_url.clone(),
            interval: self.interval,
            max_attempts: self.max_attempts,
            skip_migration: self.skip_migration,
        }
    }
}
