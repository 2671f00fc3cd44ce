use std::fmt;
use tracing::{info, warn};

use crate::config::{DeploymentConfig, MigrationSettings};
use crate::exec::{CommandResult, CommandRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    AlreadyCurrent,
    Failed(String),
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Applied => write!(f, "applied"),
            MigrationOutcome::AlreadyCurrent => write!(f, "already current"),
            MigrationOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Migration outcome plus the command result it was derived from.
#[derive(Debug, Clone)]
pub struct MigrationRun {
    pub outcome: MigrationOutcome,
    pub result: CommandResult,
}

impl MigrationRun {
    /// Whether this run should stop the deployment. Only a failure under
    /// `required = true` does; otherwise failures are advisory.
    pub fn is_blocking(&self, settings: &MigrationSettings) -> bool {
        settings.required && matches!(self.outcome, MigrationOutcome::Failed(_))
    }
}

/// Map a finished migration command to its outcome.
///
/// Exit 0 with `applied_marker` somewhere in the output means something was
/// applied; exit 0 without it means the schema was already current.
pub fn classify(result: &CommandResult, applied_marker: &str) -> MigrationOutcome {
    if !result.success() {
        let detail = result
            .tail(1)
            .pop()
            .unwrap_or_else(|| "no output".to_string());
        return MigrationOutcome::Failed(format!("{}: {}", result.describe_exit(), detail));
    }

    let marker = applied_marker.trim();
    if !marker.is_empty() && (result.stdout.contains(marker) || result.stderr.contains(marker)) {
        MigrationOutcome::Applied
    } else {
        MigrationOutcome::AlreadyCurrent
    }
}

/// Run the migration once inside the freshly started service container.
pub async fn migrate(
    config: &DeploymentConfig,
    settings: &MigrationSettings,
    runner: &dyn CommandRunner,
) -> MigrationRun {
    let mut args = vec![
        "exec".to_string(),
        "-T".to_string(),
        config.service.clone(),
    ];
    args.extend(settings.command.iter().cloned());

    let result = runner.run(&config.compose_command(args)).await;
    let outcome = classify(&result, &settings.applied_marker);

    match &outcome {
        MigrationOutcome::Failed(reason) => warn!("migration failed: {}", reason),
        other => info!("migration {}", other),
    }

    MigrationRun { outcome, result }
}
