use std::fmt;
use thiserror::Error;

/// Named step of the pipeline, used to attribute a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Teardown,
    Pull,
    Start,
    HealthWait,
    Migrate,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Teardown => "teardown",
            Stage::Pull => "pull",
            Stage::Start => "start",
            Stage::HealthWait => "health-wait",
            Stage::Migrate => "migrate",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Progress of one deployment run. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    Idle,
    PreflightOk,
    OldStopped,
    ImagePulled,
    NewStarted,
    Healthy,
    MigrationApplied,
    Succeeded,
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Error)]
#[error("illegal state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Succeeded | DeploymentState::Failed { .. })
    }

    /// Forward edges only. `Healthy → Succeeded` covers a skipped or
    /// advisory-failed migration.
    pub fn can_advance_to(&self, next: &DeploymentState) -> bool {
        use DeploymentState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Failed { .. })
                | (Idle, PreflightOk)
                | (PreflightOk, OldStopped)
                | (OldStopped, ImagePulled)
                | (ImagePulled, NewStarted)
                | (NewStarted, Healthy)
                | (Healthy, MigrationApplied)
                | (Healthy, Succeeded)
                | (MigrationApplied, Succeeded)
        )
    }

    pub fn advance(&mut self, next: DeploymentState) -> Result<(), TransitionError> {
        if !self.can_advance_to(&next) {
            return Err(TransitionError {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentState::Idle => f.write_str("idle"),
            DeploymentState::PreflightOk => f.write_str("preflight-ok"),
            DeploymentState::OldStopped => f.write_str("old-stopped"),
            DeploymentState::ImagePulled => f.write_str("image-pulled"),
            DeploymentState::NewStarted => f.write_str("new-started"),
            DeploymentState::Healthy => f.write_str("healthy"),
            DeploymentState::MigrationApplied => f.write_str("migration-applied"),
            DeploymentState::Succeeded => f.write_str("succeeded"),
            DeploymentState::Failed { stage, reason } => {
                write!(f, "failed at {}: {}", stage, reason)
            }
        }
    }
}
