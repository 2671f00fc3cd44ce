pub mod state;

use chrono::{DateTime, Local};
use tracing::{error, warn};

use crate::config::DeploymentConfig;
use crate::exec::CommandRunner;
use crate::health::{self, HealthError, HealthProbe};
use crate::lifecycle::LifecycleController;
use crate::migrate::{self, MigrationOutcome};
use crate::output;
use crate::preflight;

pub use state::{DeploymentState, Stage};

const TOTAL_STEPS: usize = 6;

/// Everything the reporter needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub state: DeploymentState,
    /// Last state reached before a failure.
    pub reached: DeploymentState,
    pub failure_output: Vec<String>,
    pub container_logs: Vec<String>,
    pub warnings: Vec<String>,
    pub probe_attempts: u32,
    pub migration: Option<MigrationOutcome>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl DeploymentRun {
    fn new() -> Self {
        let now = Local::now();
        Self {
            state: DeploymentState::Idle,
            reached: DeploymentState::Idle,
            failure_output: Vec::new(),
            container_logs: Vec::new(),
            warnings: Vec::new(),
            probe_attempts: 0,
            migration: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn elapsed_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    fn advance(&mut self, stage: Stage, next: DeploymentState) -> Result<(), StageFailure> {
        self.state
            .advance(next)
            .map_err(|e| StageFailure::new(stage, e.to_string()))
    }
}

/// Why the pipeline stopped, with whatever output explains it.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    reason: String,
    output: Vec<String>,
    container_logs: Vec<String>,
}

impl StageFailure {
    fn new(stage: Stage, reason: String) -> Self {
        Self {
            stage,
            reason,
            output: Vec::new(),
            container_logs: Vec::new(),
        }
    }

    fn with_output(mut self, output: Vec<String>) -> Self {
        self.output = output;
        self
    }
}

/// Drives one deployment through preflight, teardown, pull, start,
/// health-wait and migrate. Each stage runs only after the previous one
/// returned; the first fatal error ends the run.
pub struct Deployer<'a> {
    config: &'a DeploymentConfig,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn HealthProbe,
}

impl<'a> Deployer<'a> {
    pub fn new(
        config: &'a DeploymentConfig,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn HealthProbe,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
        }
    }

    pub async fn run(&self) -> DeploymentRun {
        let mut run = DeploymentRun::new();

        if let Err(failure) = self.drive(&mut run).await {
            error!("{} failed: {}", failure.stage, failure.reason);
            run.reached = run.state.clone();
            run.failure_output = failure.output;
            run.container_logs = failure.container_logs;
            let failed = DeploymentState::Failed {
                stage: failure.stage,
                reason: failure.reason,
            };
            if let Err(e) = run.state.advance(failed.clone()) {
                warn!("{}", e);
                run.state = failed;
            }
        }

        run.finished_at = Local::now();
        run
    }

    async fn drive(&self, run: &mut DeploymentRun) -> Result<(), StageFailure> {
        let config = self.config;
        let tail = config.log_tail_lines;
        let lifecycle = LifecycleController::new(config, self.runner);

        output::header(&format!("Deploying {} as {}", config.image, config.service));

        // Step 1: Preflight
        output::step(1, TOTAL_STEPS, "Checking required tools");
        preflight::check(self.runner, &preflight::required_tools(config))
            .await
            .map_err(|e| {
                StageFailure::new(Stage::Preflight, e.to_string()).with_output(e.probe.tail(tail))
            })?;
        output::success("Container engine and compose available");
        run.advance(Stage::Preflight, DeploymentState::PreflightOk)?;

        // Step 2: Teardown (nothing to stop on a fresh host is fine)
        output::step(2, TOTAL_STEPS, "Stopping previous deployment");
        match lifecycle.teardown().await {
            Ok(()) => output::success("Previous deployment stopped"),
            Err(e) => {
                warn!("{}", e);
                output::warning(&format!("{} (continuing)", e));
                run.warnings.push(e.to_string());
            }
        }
        run.advance(Stage::Teardown, DeploymentState::OldStopped)?;

        // Step 3: Pull
        output::step(3, TOTAL_STEPS, &format!("Pulling {}", config.image));
        let spinner = output::create_spinner("Pulling...");
        let pulled = lifecycle.pull().await;
        spinner.finish_and_clear();
        pulled.map_err(|e| {
            StageFailure::new(Stage::Pull, e.to_string()).with_output(e.result().tail(tail))
        })?;
        output::success("Image pulled");
        run.advance(Stage::Pull, DeploymentState::ImagePulled)?;

        // Step 4: Start
        output::step(4, TOTAL_STEPS, &format!("Starting {}", config.service));
        lifecycle.start().await.map_err(|e| {
            StageFailure::new(Stage::Start, e.to_string()).with_output(e.result().tail(tail))
        })?;
        output::success("Containers started");
        run.advance(Stage::Start, DeploymentState::NewStarted)?;

        // Step 5: Health
        output::step(5, TOTAL_STEPS, "Waiting for service to become healthy");
        let spinner = output::create_spinner(&format!(
            "Probing {} (up to {} attempts, every {}s)...",
            config.health.url.as_deref().unwrap_or(&config.service),
            config.health.max_attempts,
            config.health.interval.as_secs()
        ));
        let healthy =
            health::wait_healthy(config.health.max_attempts, config.health.interval, self.probe)
                .await;
        spinner.finish_and_clear();

        match healthy {
            Ok(result) => {
                run.probe_attempts = result.attempt;
                output::success(&format!(
                    "Healthy after {} attempt(s) ({})",
                    result.attempt, result.signal
                ));
            }
            Err(e) => {
                run.probe_attempts = match &e {
                    HealthError::Crashed { attempt, .. } => *attempt,
                    HealthError::Timeout { attempts_made, .. } => *attempts_made,
                };
                let mut failure = StageFailure::new(Stage::HealthWait, e.to_string());
                failure.container_logs = lifecycle.logs(tail).await;
                return Err(failure);
            }
        }
        run.advance(Stage::HealthWait, DeploymentState::Healthy)?;

        // Step 6: Migrate (advisory unless marked required)
        let Some(settings) = &config.migration else {
            output::step(6, TOTAL_STEPS, "Schema migration");
            output::info("No migration configured (skipped)");
            return run.advance(Stage::Migrate, DeploymentState::Succeeded);
        };

        output::step(6, TOTAL_STEPS, "Applying schema migration");
        let migration = migrate::migrate(config, settings, self.runner).await;
        run.migration = Some(migration.outcome.clone());

        match &migration.outcome {
            MigrationOutcome::Applied | MigrationOutcome::AlreadyCurrent => {
                output::success(&format!("Migration {}", migration.outcome));
                run.advance(Stage::Migrate, DeploymentState::MigrationApplied)?;
            }
            MigrationOutcome::Failed(reason) if migration.is_blocking(settings) => {
                return Err(StageFailure::new(Stage::Migrate, format!("migration failed: {}", reason))
                    .with_output(migration.result.tail(tail)));
            }
            MigrationOutcome::Failed(reason) => {
                output::warning(&format!(
                    "Migration failed: {} (deployment stays up, retry on next deploy)",
                    reason
                ));
                run.warnings.push(format!("migration failed: {}", reason));
            }
        }

        run.advance(Stage::Report, DeploymentState::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample;
    use crate::exec::testing::ScriptedRunner;
    use crate::health::testing::ScriptedProbe;
    use crate::health::{HealthSignal, ProbeReport};

    const CONFIG: &str = r#"
        [service]
        name = "api"
        image = "app:v2"

        [health]
        url = "http://localhost:8000/health-check"
        interval = 2
        max_attempts = 5
    "#;

    const WITH_MIGRATION: &str = r#"
        [service]
        name = "api"
        image = "app:v2"

        [health]
        interval = 1
        max_attempts = 3

        [migration]
        command = ["alembic", "upgrade", "head"]
    "#;

    fn healthy_host() -> ScriptedRunner {
        ScriptedRunner::new().respond(&["image", "inspect"], 0, "sha256:abc\n")
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_success_after_three_probes() {
        let config = sample(CONFIG);
        let runner = healthy_host();
        let probe = ScriptedProbe::healthy_on(3);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert_eq!(run.state, DeploymentState::Succeeded);
        assert_eq!(probe.calls(), 3);
        assert_eq!(run.probe_attempts, 3);
        assert!(run.warnings.is_empty());

        let down = runner.position(&["down", "--remove-orphans"]).unwrap();
        let pull = runner.position(&["docker", "pull", "app:v2"]).unwrap();
        let up = runner.position(&["up", "-d"]).unwrap();
        assert!(down < pull && pull < up);
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_failure_runs_no_state_changing_command() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["compose", "version"], 127, "not found");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert!(matches!(
            run.state,
            DeploymentState::Failed { stage: Stage::Preflight, .. }
        ));
        assert_eq!(run.reached, DeploymentState::Idle);
        assert!(!runner.invoked(&["down"]));
        assert!(!runner.invoked(&["pull"]));
        assert!(!runner.invoked(&["up"]));
        assert_eq!(probe.calls(), 0);
        assert_eq!(run.failure_output, vec!["not found"]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_failure_does_not_block_pull() {
        let config = sample(CONFIG);
        let runner = healthy_host().fail(&["down"], 1, "no configuration file provided: not found");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert_eq!(run.state, DeploymentState::Succeeded);
        assert!(runner.invoked(&["docker", "pull", "app:v2"]));
        assert_eq!(run.warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pull_failure_never_starts() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["docker", "pull"], 1, "manifest for app:v2 not found");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert!(matches!(run.state, DeploymentState::Failed { stage: Stage::Pull, .. }));
        assert_eq!(run.reached, DeploymentState::OldStopped);
        assert!(!runner.invoked(&["up"]));
        assert_eq!(run.failure_output, vec!["manifest for app:v2 not found"]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_is_fatal() {
        let config = sample(CONFIG);
        let runner = healthy_host().fail(&["up", "-d"], 1, "port is already allocated");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert!(matches!(run.state, DeploymentState::Failed { stage: Stage::Start, .. }));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_collects_container_logs() {
        let config = sample(CONFIG);
        let runner = healthy_host().respond(&["logs"], 0, "api-1  | ModuleNotFoundError: No module named 'src'\n");
        let probe = ScriptedProbe::new(vec![ProbeReport::Exited(HealthSignal::Container {
            state: "exited".to_string(),
            health: None,
            exit_code: Some(1),
        })]);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert!(matches!(
            run.state,
            DeploymentState::Failed { stage: Stage::HealthWait, .. }
        ));
        assert_eq!(probe.calls(), 1);
        assert_eq!(run.reached, DeploymentState::NewStarted);
        assert_eq!(
            run.container_logs,
            vec!["api-1  | ModuleNotFoundError: No module named 'src'"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn health_timeout_fails_and_skips_migration() {
        let config = sample(WITH_MIGRATION);
        let runner = healthy_host();
        let probe = ScriptedProbe::never_healthy();

        let run = Deployer::new(&config, &runner, &probe).run().await;

        match &run.state {
            DeploymentState::Failed { stage, reason } => {
                assert_eq!(*stage, Stage::HealthWait);
                assert!(reason.contains("after 3 attempts"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(run.probe_attempts, 3);
        assert!(!runner.invoked(&["alembic"]));
    }

    #[tokio::test(start_paused = true)]
    async fn migration_failure_is_advisory() {
        let config = sample(WITH_MIGRATION);
        let runner = healthy_host().fail(&["alembic"], 1, "relation already exists");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert_eq!(run.state, DeploymentState::Succeeded);
        assert!(matches!(run.migration, Some(MigrationOutcome::Failed(_))));
        assert_eq!(run.warnings.len(), 1);
        // No rollback: the only `down` is the initial teardown.
        let downs = runner
            .calls()
            .iter()
            .filter(|c| c.args.iter().any(|a| a == "down"))
            .count();
        assert_eq!(downs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn required_migration_failure_fails_the_run() {
        let config = sample(&format!("{}required = true\n", WITH_MIGRATION));
        let runner = healthy_host().fail(&["alembic"], 1, "relation already exists");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert!(matches!(run.state, DeploymentState::Failed { stage: Stage::Migrate, .. }));
        assert_eq!(run.reached, DeploymentState::Healthy);
        assert_eq!(run.failure_output, vec!["relation already exists"]);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_migration_passes_through_migration_applied() {
        let config = sample(WITH_MIGRATION);
        let runner = healthy_host().respond(&["alembic"], 0, "Running upgrade a -> b\n");
        let probe = ScriptedProbe::healthy_on(1);

        let run = Deployer::new(&config, &runner, &probe).run().await;

        assert_eq!(run.state, DeploymentState::Succeeded);
        assert_eq!(run.migration, Some(MigrationOutcome::Applied));
        let up = runner.position(&["up", "-d"]).unwrap();
        let migrate = runner.position(&["alembic"]).unwrap();
        assert!(up < migrate);
    }
}
