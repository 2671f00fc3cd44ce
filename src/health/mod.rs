pub mod compose;
pub mod http;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

pub use compose::ComposeProbe;
pub use http::HttpProbe;

/// Raw evidence behind a probe verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    Http {
        status: u16,
    },
    Unreachable {
        reason: String,
    },
    Container {
        state: String,
        health: Option<String>,
        exit_code: Option<i32>,
    },
}

impl fmt::Display for HealthSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthSignal::Http { status } => write!(f, "HTTP {}", status),
            HealthSignal::Unreachable { reason } => write!(f, "unreachable ({})", reason),
            HealthSignal::Container {
                state,
                health,
                exit_code,
            } => {
                write!(f, "container {}", state)?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {})", code)?;
                }
                if let Some(health) = health.as_deref().filter(|h| !h.is_empty()) {
                    write!(f, ", health {}", health)?;
                }
                Ok(())
            }
        }
    }
}

/// Verdict of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReport {
    Healthy(HealthSignal),
    /// Not healthy yet. Worth asking again.
    Unhealthy(HealthSignal),
    /// The process behind the service is gone. Asking again will not help.
    Exited(HealthSignal),
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> ProbeReport;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub signal: HealthSignal,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("service exited during health check (attempt {attempt}): {signal}")]
    Crashed { attempt: u32, signal: HealthSignal },

    #[error("service not healthy after {attempts_made} attempts, last signal: {last}")]
    Timeout {
        attempts_made: u32,
        last: HealthSignal,
    },
}

/// Probe until healthy, exited, or `max_attempts` probes have been made.
///
/// The whole wait is bounded by `max_attempts × interval` of wall-clock
/// time. A probe still running when that budget runs out is abandoned and
/// counts as unhealthy, and the sleep between attempts is clamped to what is
/// left. There is no sleep after the last attempt. At least one probe is
/// always made.
pub async fn wait_healthy(
    max_attempts: u32,
    interval: Duration,
    probe: &dyn HealthProbe,
) -> Result<HealthCheckResult, HealthError> {
    let max_attempts = max_attempts.max(1);
    let budget = interval.saturating_mul(max_attempts);
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        debug!("Health check attempt {}/{}", attempt, max_attempts);

        let remaining = budget.saturating_sub(started.elapsed());
        let report = match tokio::time::timeout(remaining, probe.probe()).await {
            Ok(report) => report,
            Err(_) => {
                debug!("probe abandoned, health wait budget of {:?} spent", budget);
                ProbeReport::Unhealthy(HealthSignal::Unreachable {
                    reason: "probe did not answer in time".to_string(),
                })
            }
        };

        match report {
            ProbeReport::Healthy(signal) => {
                return Ok(HealthCheckResult { signal, attempt });
            }
            ProbeReport::Exited(signal) => {
                return Err(HealthError::Crashed { attempt, signal });
            }
            ProbeReport::Unhealthy(signal) => {
                debug!("not healthy yet: {} (attempt {}/{})", signal, attempt, max_attempts);
                let remaining = budget.saturating_sub(started.elapsed());
                if attempt >= max_attempts || remaining.is_zero() {
                    return Err(HealthError::Timeout {
                        attempts_made: attempt,
                        last: signal,
                    });
                }
                tokio::time::sleep(interval.min(remaining)).await;
            }
        }

        attempt += 1;
    }
}
