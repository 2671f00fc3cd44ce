use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::DeploymentConfig;
use crate::exec::CommandRunner;

use super::{HealthProbe, HealthSignal, HttpProbe, ProbeReport};

/// One row of `docker compose ps --format json`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PsEntry {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl PsEntry {
    /// Restarting counts: the process died and the engine is cycling it.
    pub fn has_exited(&self) -> bool {
        matches!(self.state.as_str(), "exited" | "dead" | "restarting")
    }

    fn signal(&self) -> HealthSignal {
        HealthSignal::Container {
            state: self.state.clone(),
            health: Some(self.health.clone()).filter(|h| !h.is_empty()),
            exit_code: self.exit_code.filter(|_| self.has_exited()),
        }
    }
}

/// Parse compose ps output. Older compose prints one JSON array, newer
/// releases print one object per line.
pub fn parse_ps(output: &str) -> Result<Vec<PsEntry>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Failed to parse compose ps JSON array");
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).context("Failed to parse compose ps JSON line"))
        .collect()
}

/// Asks compose whether the service's container is still alive, then checks
/// liveness over HTTP when a URL is configured, or the container's own
/// healthcheck otherwise.
pub struct ComposeProbe<'a> {
    config: &'a DeploymentConfig,
    runner: &'a dyn CommandRunner,
    http: Option<HttpProbe>,
}

impl<'a> ComposeProbe<'a> {
    pub fn new(
        config: &'a DeploymentConfig,
        runner: &'a dyn CommandRunner,
        http: Option<HttpProbe>,
    ) -> Self {
        Self {
            config,
            runner,
            http,
        }
    }

    /// Probe built from the config's health URL, if one is set. The request
    /// timeout never exceeds the poll interval.
    pub fn from_config(config: &'a DeploymentConfig, runner: &'a dyn CommandRunner) -> Result<Self> {
        let timeout = config.health.request_timeout.min(config.health.interval);
        let http = config
            .health
            .url
            .as_deref()
            .map(|url| HttpProbe::new(url, timeout))
            .transpose()?;
        Ok(Self::new(config, runner, http))
    }
}

#[async_trait]
impl HealthProbe for ComposeProbe<'_> {
    async fn probe(&self) -> ProbeReport {
        let service = self.config.service.as_str();
        // A hung daemon must not hold one attempt past the poll interval.
        let spec = self
            .config
            .compose_command(["ps", "-a", "--format", "json", service])
            .timeout(self.config.command_timeout.min(self.config.health.interval));
        let result = self.runner.run(&spec).await;

        if !result.success() {
            return ProbeReport::Unhealthy(HealthSignal::Unreachable {
                reason: format!("compose ps {}", result.describe_exit()),
            });
        }

        let entries = match parse_ps(&result.stdout) {
            Ok(entries) => entries,
            Err(e) => {
                return ProbeReport::Unhealthy(HealthSignal::Unreachable {
                    reason: format!("{:#}", e),
                })
            }
        };

        let entry = entries
            .iter()
            .find(|e| e.service == service)
            .or_else(|| entries.first());

        let Some(entry) = entry else {
            return ProbeReport::Exited(HealthSignal::Container {
                state: "missing".to_string(),
                health: None,
                exit_code: None,
            });
        };

        debug!("{} container: state={} health={}", service, entry.state, entry.health);

        if entry.has_exited() {
            return ProbeReport::Exited(entry.signal());
        }

        if let Some(http) = &self.http {
            return http.probe().await;
        }

        match (entry.state.as_str(), entry.health.as_str()) {
            ("running", "healthy") | ("running", "") => ProbeReport::Healthy(entry.signal()),
            _ => ProbeReport::Unhealthy(entry.signal()),
        }
    }
}
