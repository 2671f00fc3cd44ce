use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::CommandSpec;

mod image;
mod validate;

pub use image::ImageRef;

/// On-disk shape of `redeploy.toml`. Every field is optional so that
/// environment variables and flags can supply the rest.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub health: HealthSection,
    pub migration: Option<MigrationSection>,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: Option<String>,
    pub image: Option<String>,
    pub project: Option<String>,
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            project: None,
            workdir: default_workdir(),
            compose_file: default_compose_file(),
            env_file: None,
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    #[serde(default = "default_compose")]
    pub compose: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default = "default_image_env")]
    pub image_env: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            compose: default_compose(),
            command_timeout: default_command_timeout(),
            image_env: default_image_env(),
        }
    }
}

fn default_engine_binary() -> String {
    "docker".to_string()
}
fn default_compose() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}
fn default_command_timeout() -> u64 {
    300
}
fn default_image_env() -> String {
    "APP_IMAGE".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    pub url: Option<String>,
    #[serde(default = "default_health_interval")]
    pub interval: u64,
    #[serde(default = "default_health_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_request_timeout")]
    pub request_timeout: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            url: None,
            interval: default_health_interval(),
            max_attempts: default_health_max_attempts(),
            request_timeout: default_health_request_timeout(),
        }
    }
}

fn default_health_interval() -> u64 {
    2
}
fn default_health_max_attempts() -> u32 {
    15
}
fn default_health_request_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSection {
    pub command: Vec<String>,
    #[serde(default = "default_applied_marker")]
    pub applied_marker: String,
    #[serde(default)]
    pub required: bool,
}

fn default_applied_marker() -> String {
    "Running upgrade".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSection {
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    pub audit_log: Option<PathBuf>,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            log_tail_lines: default_log_tail_lines(),
            audit_log: None,
        }
    }
}

fn default_log_tail_lines() -> usize {
    30
}

/// Values supplied on the command line or through `REDEPLOY_*` variables.
/// Each one wins over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub image: Option<String>,
    pub tag: Option<String>,
    pub service: Option<String>,
    pub health_url: Option<String>,
    pub interval: Option<u64>,
    pub max_attempts: Option<u32>,
    pub skip_migration: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub url: Option<String>,
    pub interval: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub command: Vec<String>,
    pub applied_marker: String,
    pub required: bool,
}

/// Everything one deployment run needs. Built once at startup and only
/// ever borrowed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub service: String,
    pub project: Option<String>,
    pub image: ImageRef,
    pub workdir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    pub engine: String,
    pub compose: Vec<String>,
    pub image_env: String,
    pub command_timeout: Duration,
    pub health: HealthSettings,
    pub migration: Option<MigrationSettings>,
    pub log_tail_lines: usize,
    pub audit_log: Option<PathBuf>,
    /// File the settings were read from, `None` when none was found.
    pub source: Option<PathBuf>,
}

impl DeploymentConfig {
    /// Read the config file if it exists, apply overrides and validate.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        if !path.exists() {
            return Self::resolve(FileConfig::default(), overrides);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let mut config = Self::resolve(file, overrides)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn resolve(file: FileConfig, overrides: &Overrides) -> Result<Self> {
        validate::validate_raw(&file, overrides)?;

        let service = overrides
            .service
            .clone()
            .or(file.service.name)
            .context("service.name is required (or set REDEPLOY_SERVICE)")?;

        let image_str = overrides
            .image
            .clone()
            .or(file.service.image)
            .context("service.image is required (or set REDEPLOY_IMAGE)")?;
        let mut image = ImageRef::parse(&image_str).context("Invalid service.image")?;
        if let Some(tag) = &overrides.tag {
            image = image.with_tag(tag)?;
        }

        let migration = if overrides.skip_migration {
            None
        } else {
            file.migration.map(|m| MigrationSettings {
                command: m.command,
                applied_marker: m.applied_marker,
                required: m.required,
            })
        };

        let config = Self {
            service,
            project: file.service.project,
            image,
            workdir: file.service.workdir,
            compose_file: file.service.compose_file,
            env_file: file.service.env_file,
            engine: file.engine.binary,
            compose: file.engine.compose,
            image_env: file.engine.image_env,
            command_timeout: Duration::from_secs(file.engine.command_timeout),
            health: HealthSettings {
                url: overrides.health_url.clone().or(file.health.url),
                interval: Duration::from_secs(overrides.interval.unwrap_or(file.health.interval)),
                max_attempts: overrides.max_attempts.unwrap_or(file.health.max_attempts),
                request_timeout: Duration::from_secs(file.health.request_timeout),
            },
            migration,
            log_tail_lines: file.report.log_tail_lines,
            audit_log: file.report.audit_log,
            source: None,
        };

        validate::validate(&config)?;
        Ok(config)
    }

    /// `<engine> <args...>` run from the working directory.
    pub fn engine_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.engine)
            .args(args)
            .current_dir(&self.workdir)
            .timeout(self.command_timeout)
    }

    /// `<compose...> -f <file> [-p project] [--env-file f] <args...>` with the
    /// image exported through `image_env`.
    pub fn compose_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::from_argv(&self.compose)
            .args(self.compose_globals())
            .args(args)
            .env(&self.image_env, self.image.to_string())
            .current_dir(&self.workdir)
            .timeout(self.command_timeout)
    }

    fn compose_globals(&self) -> Vec<String> {
        let mut globals = vec![
            "-f".to_string(),
            self.compose_file.display().to_string(),
        ];
        if let Some(project) = &self.project {
            globals.extend(["-p".to_string(), project.clone()]);
        }
        if let Some(env_file) = &self.env_file {
            globals.extend(["--env-file".to_string(), env_file.display().to_string()]);
        }
        globals
    }
}

#[cfg(test)]
pub(crate) fn sample(toml_src: &str) -> DeploymentConfig {
    let file: FileConfig = toml::from_str(toml_src).expect("valid test config");
    DeploymentConfig::resolve(file, &Overrides::default()).expect("resolvable test config")
}
