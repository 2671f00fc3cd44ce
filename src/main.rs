mod cli;
mod config;
mod deploy;
mod exec;
mod health;
mod lifecycle;
mod migrate;
mod output;
mod preflight;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{debug, Level};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use cli::Cli;
use config::DeploymentConfig;
use deploy::Deployer;
use exec::{audit, ProcessRunner};
use health::ComposeProbe;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::from(report::EXIT_GENERIC)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = DeploymentConfig::load(&cli.config, &cli.overrides())?;

    init_tracing(cli.verbose, config.audit_log.as_deref())?;
    match &config.source {
        Some(path) => debug!("settings read from {}", path.display()),
        None => debug!("{} not found, using environment and flags only", cli.config.display()),
    }

    let runner = ProcessRunner::new();
    let probe = ComposeProbe::from_config(&config, &runner)?;

    let run = Deployer::new(&config, &runner, &probe).run().await;

    Ok(report::report(&run, &config))
}

/// Console diagnostics follow `-v`/`RUST_LOG`. Audit events go to the
/// audit file when one is configured, otherwise to the console.
fn init_tracing(verbose: u8, audit_log: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let audit_file = audit_log
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open audit log: {}", path.display()))
        })
        .transpose()?;

    let default_filter = if audit_file.is_some() {
        level.to_string()
    } else {
        format!("{},{}=info", level, audit::TARGET)
    };

    let console = fmt::layer()
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        );

    let audit_layer = audit_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
            .with_filter(Targets::new().with_target(audit::TARGET, Level::INFO))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(audit_layer)
        .init();

    Ok(())
}
