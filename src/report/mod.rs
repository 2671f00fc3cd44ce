use anyhow::{Context, Result};
use minijinja::Environment;
use std::process::ExitCode;

use crate::config::DeploymentConfig;
use crate::deploy::{DeploymentRun, DeploymentState, Stage};
use crate::exec::CommandSpec;
use crate::output;

const HINTS_TEMPLATE: &str = include_str!("../../templates/hints.txt.j2");

pub const EXIT_SUCCESS: u8 = 0;
/// Configuration errors, internal errors, and runs that never finished.
pub const EXIT_GENERIC: u8 = 1;
pub const EXIT_PREFLIGHT: u8 = 2;
pub const EXIT_PULL: u8 = 3;
pub const EXIT_START: u8 = 4;
pub const EXIT_HEALTH: u8 = 5;
pub const EXIT_MIGRATE: u8 = 6;

pub fn exit_code(state: &DeploymentState) -> u8 {
    match state {
        DeploymentState::Succeeded => EXIT_SUCCESS,
        DeploymentState::Failed { stage, .. } => match stage {
            Stage::Preflight => EXIT_PREFLIGHT,
            Stage::Pull => EXIT_PULL,
            Stage::Start => EXIT_START,
            Stage::HealthWait => EXIT_HEALTH,
            Stage::Migrate => EXIT_MIGRATE,
            Stage::Teardown | Stage::Report => EXIT_GENERIC,
        },
        _ => EXIT_GENERIC,
    }
}

/// Print the outcome of a run and return the process exit code for it.
pub fn report(run: &DeploymentRun, config: &DeploymentConfig) -> ExitCode {
    match &run.state {
        DeploymentState::Succeeded => report_success(run, config),
        DeploymentState::Failed { stage, reason } => report_failure(run, *stage, reason),
        other => {
            output::error(&format!("Deployment stopped in state {}", other));
        }
    }
    ExitCode::from(exit_code(&run.state))
}

fn report_success(run: &DeploymentRun, config: &DeploymentConfig) {
    println!();
    output::success(&format!(
        "Deploy complete! {} is live as {} ({} probe attempt(s), {}s).",
        config.image,
        config.service,
        run.probe_attempts,
        run.elapsed_secs()
    ));

    if let Some(outcome) = &run.migration {
        output::info(&format!("Migration: {}", outcome));
    }

    for warning in &run.warnings {
        output::warning(warning);
    }

    match render_hints(config) {
        Ok(hints) => println!("{}", hints),
        Err(e) => output::warning(&format!("{:#}", e)),
    }
}

fn report_failure(run: &DeploymentRun, stage: Stage, reason: &str) {
    println!();
    output::error(&format!("Deployment failed at {}: {}", stage, reason));
    output::excerpt("output of the failing command:", &run.failure_output);
    output::excerpt("container logs:", &run.container_logs);
    for warning in &run.warnings {
        output::warning(warning);
    }
    output::info(&format!("Last state reached: {}", run.reached));
}

/// Operator hints: how to check, follow, restart and stop the deployment.
pub fn render_hints(config: &DeploymentConfig) -> Result<String> {
    let health = match &config.health.url {
        Some(url) => format!("curl -fsS {}", url),
        None => hint_command(config, config.compose_command(["ps", config.service.as_str()])),
    };

    let mut env = Environment::new();
    env.add_template("hints", HINTS_TEMPLATE)
        .context("Failed to load hints template")?;
    let tmpl = env.get_template("hints")?;

    tmpl.render(minijinja::context! {
        health => health,
        logs_cmd => hint_command(config, config.compose_command(["logs", "-f", config.service.as_str()])),
        restart_cmd => hint_command(config, config.compose_command(["restart", config.service.as_str()])),
        stop_cmd => hint_command(config, config.compose_command(["down"])),
    })
    .context("Failed to render hints template")
}

/// A compose invocation as the operator would type it, working directory
/// and image variable included.
fn hint_command(config: &DeploymentConfig, spec: CommandSpec) -> String {
    let cd = match &spec.current_dir {
        Some(dir) if dir.as_os_str() != "." => format!("cd {} && ", dir.display()),
        _ => String::new(),
    };
    format!("{}{}={} {}", cd, config.image_env, config.image, spec.display())
}
