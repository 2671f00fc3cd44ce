use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::config::DeploymentConfig;
use crate::exec::{CommandResult, CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ContainerEngine,
    Compose,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::ContainerEngine => write!(f, "container engine"),
            Tool::Compose => write!(f, "compose"),
        }
    }
}

/// A tool plus the cheap command that proves it is installed.
#[derive(Debug, Clone)]
pub struct RequiredTool {
    pub tool: Tool,
    pub probe: CommandSpec,
}

#[derive(Debug, Error)]
#[error("{tool} is not available: `{}` {}", .probe.command, .probe.describe_exit())]
pub struct MissingToolError {
    pub tool: Tool,
    pub probe: CommandResult,
}

/// The engine (`docker --version`) and compose (`docker compose version`)
/// probes for a configuration.
pub fn required_tools(config: &DeploymentConfig) -> Vec<RequiredTool> {
    vec![
        RequiredTool {
            tool: Tool::ContainerEngine,
            probe: config.engine_command(["--version"]),
        },
        RequiredTool {
            tool: Tool::Compose,
            probe: CommandSpec::from_argv(&config.compose)
                .arg("version")
                .current_dir(&config.workdir)
                .timeout(config.command_timeout),
        },
    ]
}

/// Probe each tool in order and stop at the first one that is missing.
pub async fn check(
    runner: &dyn CommandRunner,
    required: &[RequiredTool],
) -> Result<(), MissingToolError> {
    for req in required {
        let result = runner.run(&req.probe).await;
        if !result.success() {
            return Err(MissingToolError {
                tool: req.tool,
                probe: result,
            });
        }
        debug!("{} ok: {}", req.tool, result.stdout.lines().next().unwrap_or("").trim());
    }
    Ok(())
}
