use anyhow::{bail, Result};

use super::{DeploymentConfig, FileConfig, Overrides};

/// Checks that only make sense on the raw numbers, before they become durations.
pub fn validate_raw(file: &FileConfig, overrides: &Overrides) -> Result<()> {
    if overrides.interval.unwrap_or(file.health.interval) == 0 {
        bail!("health.interval must be at least 1 second");
    }

    if overrides.max_attempts.unwrap_or(file.health.max_attempts) == 0 {
        bail!("health.max_attempts must be at least 1");
    }

    if file.health.request_timeout == 0 {
        bail!("health.request_timeout must be at least 1 second");
    }

    if file.engine.command_timeout == 0 {
        bail!("engine.command_timeout must be at least 1 second");
    }

    Ok(())
}

pub fn validate(config: &DeploymentConfig) -> Result<()> {
    if config.service.trim().is_empty() {
        bail!("service.name cannot be empty");
    }

    if config.service.starts_with('-') {
        bail!("service.name '{}' cannot start with '-'", config.service);
    }

    if config.engine.trim().is_empty() {
        bail!("engine.binary cannot be empty");
    }

    if config.compose.is_empty() || config.compose.iter().any(|a| a.trim().is_empty()) {
        bail!("engine.compose must be a non-empty list of arguments");
    }

    if config.image_env.is_empty()
        || !config
            .image_env
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!(
            "engine.image_env '{}' is not a valid environment variable name",
            config.image_env
        );
    }

    if let Some(url) = &config.health.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("health.url '{}' must start with http:// or https://", url);
        }
    }

    if let Some(migration) = &config.migration {
        if migration.command.is_empty() || migration.command[0].trim().is_empty() {
            bail!("migration.command must be a non-empty list of arguments");
        }
    }

    Ok(())
}
