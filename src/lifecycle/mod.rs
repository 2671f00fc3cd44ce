//! Retire the old deployment, fetch the new image, start the new deployment.
//!
//! Calls are issued strictly as teardown → pull → start and none of them is
//! retried here. A failed state-changing call is reported as-is so it can
//! never be mistaken for success.

use thiserror::Error;
use tracing::{debug, info};

use crate::config::DeploymentConfig;
use crate::exec::{CommandResult, CommandRunner};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("teardown `{}` failed ({})", .0.command, .0.describe_exit())]
    Teardown(CommandResult),

    #[error("pull of {image} failed ({})", .result.describe_exit())]
    Pull { image: String, result: CommandResult },

    #[error("{image} is not present after pull ({})", .result.describe_exit())]
    PullVerify { image: String, result: CommandResult },

    #[error("start `{}` failed ({})", .0.command, .0.describe_exit())]
    Start(CommandResult),
}

impl LifecycleError {
    pub fn result(&self) -> &CommandResult {
        match self {
            LifecycleError::Teardown(r) | LifecycleError::Start(r) => r,
            LifecycleError::Pull { result, .. } | LifecycleError::PullVerify { result, .. } => {
                result
            }
        }
    }
}

pub struct LifecycleController<'a> {
    config: &'a DeploymentConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> LifecycleController<'a> {
    pub fn new(config: &'a DeploymentConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Stop and remove the previous deployment and its orphans.
    ///
    /// A nonzero exit is returned to the caller, which treats it as advisory:
    /// a fresh host has nothing to tear down.
    pub async fn teardown(&self) -> Result<(), LifecycleError> {
        let spec = self.config.compose_command(["down", "--remove-orphans"]);
        let result = self.runner.run(&spec).await;
        if !result.success() {
            return Err(LifecycleError::Teardown(result));
        }
        info!("previous deployment of {} stopped", self.config.service);
        Ok(())
    }

    /// Pull the configured image and confirm it is now present locally.
    pub async fn pull(&self) -> Result<(), LifecycleError> {
        let image = self.config.image.to_string();

        let result = self.runner.run(&self.config.engine_command(["pull", &image])).await;
        if !result.success() {
            return Err(LifecycleError::Pull { image, result });
        }

        let inspect = self
            .config
            .engine_command(["image", "inspect", "--format", "{{.Id}}", &image]);
        let result = self.runner.run(&inspect).await;
        if !result.success() || result.stdout.trim().is_empty() {
            return Err(LifecycleError::PullVerify { image, result });
        }

        debug!("{} present as {}", image, result.stdout.trim());
        Ok(())
    }

    /// Start the new deployment detached, using only local images.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let spec = self.config.compose_command([
            "up",
            "-d",
            "--no-build",
            self.config.service.as_str(),
        ]);
        let result = self.runner.run(&spec).await;
        if !result.success() {
            return Err(LifecycleError::Start(result));
        }
        info!("{} started with {}", self.config.service, self.config.image);
        Ok(())
    }

    /// Last `lines` lines of the service's container logs, best effort.
    pub async fn logs(&self, lines: usize) -> Vec<String> {
        let spec = self.config.compose_command([
            "logs".to_string(),
            "--no-color".to_string(),
            "--tail".to_string(),
            lines.to_string(),
            self.config.service.clone(),
        ]);
        let result = self.runner.run(&spec).await;
        if !result.success() {
            debug!("could not fetch logs: {}", result.describe_exit());
            return Vec::new();
        }
        result.tail(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample;
    use crate::exec::testing::ScriptedRunner;

    const CONFIG: &str = r#"
        [service]
        name = "api"
        image = "registry.example.com/acme/api:v2"
        compose_file = "docker-compose.prod.yml"
    "#;

    #[tokio::test]
    async fn teardown_removes_orphans() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new();
        LifecycleController::new(&config, &runner).teardown().await.unwrap();

        assert_eq!(
            runner.argvs(),
            vec!["docker compose -f docker-compose.prod.yml down --remove-orphans"]
        );
    }

    #[tokio::test]
    async fn teardown_failure_is_returned_for_the_caller_to_judge() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["down"], 1, "no such project");
        let err = LifecycleController::new(&config, &runner).teardown().await.unwrap_err();

        assert!(matches!(err, LifecycleError::Teardown(_)));
        assert_eq!(err.result().tail(1), vec!["no such project"]);
    }

    #[tokio::test]
    async fn pull_then_verifies_presence() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().respond(&["image", "inspect"], 0, "sha256:deadbeef\n");
        LifecycleController::new(&config, &runner).pull().await.unwrap();

        assert_eq!(
            runner.argvs(),
            vec![
                "docker pull registry.example.com/acme/api:v2",
                "docker image inspect --format {{.Id}} registry.example.com/acme/api:v2",
            ]
        );
    }

    #[tokio::test]
    async fn pull_failure_skips_verification() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["pull"], 1, "manifest unknown");
        let err = LifecycleController::new(&config, &runner).pull().await.unwrap_err();

        assert!(matches!(err, LifecycleError::Pull { .. }));
        assert!(!runner.invoked(&["image", "inspect"]));
    }

    #[tokio::test]
    async fn image_absent_after_pull_is_fatal() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["image", "inspect"], 1, "No such image");
        let err = LifecycleController::new(&config, &runner).pull().await.unwrap_err();

        assert!(matches!(err, LifecycleError::PullVerify { .. }));
        assert!(err.to_string().contains("not present after pull"));
    }

    #[tokio::test]
    async fn start_pins_image_and_never_builds() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new();
        LifecycleController::new(&config, &runner).start().await.unwrap();

        let calls = runner.calls();
        let call = &calls[0];
        assert_eq!(
            call.argv().join(" "),
            "docker compose -f docker-compose.prod.yml up -d --no-build api"
        );
        assert!(call
            .env
            .contains(&("APP_IMAGE".to_string(), "registry.example.com/acme/api:v2".to_string())));
    }

    #[tokio::test]
    async fn start_failure_is_fatal() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().fail(&["up"], 1, "port is already allocated");
        let err = LifecycleController::new(&config, &runner).start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Start(_)));
    }

    #[tokio::test]
    async fn logs_are_best_effort() {
        let config = sample(CONFIG);
        let runner = ScriptedRunner::new().respond(&["logs"], 0, "api-1  | boot\napi-1  | ImportError\n");
        let lines = LifecycleController::new(&config, &runner).logs(1).await;
        assert_eq!(lines, vec!["api-1  | ImportError"]);

        let runner = ScriptedRunner::new().fail(&["logs"], 1, "no container");
        assert!(LifecycleController::new(&config, &runner).logs(5).await.is_empty());
    }
}
