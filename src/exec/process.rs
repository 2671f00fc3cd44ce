use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    audit, CommandResult, CommandRunner, CommandSpec, SPAWN_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE,
    UNKNOWN_EXIT_CODE,
};

/// Runs commands as local child processes.
///
/// Children are spawned with `kill_on_drop`, so a timeout that drops the wait
/// future also kills the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandResult {
        debug!("exec: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let result = match cmd.spawn() {
            Err(e) => CommandResult {
                command: spec.display(),
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: e.to_string(),
                duration: started.elapsed(),
                timed_out: false,
            },
            Ok(child) => match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => CommandResult {
                    command: spec.display(),
                    exit_code: exit_code(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration: started.elapsed(),
                    timed_out: false,
                },
                Ok(Err(e)) => CommandResult {
                    command: spec.display(),
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("failed to wait for process: {}", e),
                    duration: started.elapsed(),
                    timed_out: false,
                },
                Err(_) => {
                    warn!("{} timed out after {:?}, killed", spec.program, spec.timeout);
                    CommandResult {
                        command: spec.display(),
                        exit_code: TIMEOUT_EXIT_CODE,
                        stdout: String::new(),
                        stderr: format!("killed after exceeding timeout of {:?}", spec.timeout),
                        duration: started.elapsed(),
                        timed_out: true,
                    }
                }
            },
        };

        audit::record(spec, &result);
        result
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let spec = CommandSpec::new("echo").arg("hello").current_dir("/tmp");
        let result = ProcessRunner::new().run(&spec).await;

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let result = ProcessRunner::new().run(&spec).await;

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
        assert!(!result.success());
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let spec = CommandSpec::new("echo").arg("app:v2; rm -rf /tmp/nothing");
        let result = ProcessRunner::new().run(&spec).await;

        assert_eq!(result.stdout.trim(), "app:v2; rm -rf /tmp/nothing");
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$APP_IMAGE\""])
            .env("APP_IMAGE", "app:v2");
        let result = ProcessRunner::new().run(&spec).await;

        assert_eq!(result.stdout, "app:v2");
    }

    #[tokio::test]
    async fn timeout_kills_child_and_marks_result() {
        let spec = CommandSpec::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(200));
        let result = ProcessRunner::new().run(&spec).await;

        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.duration < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn signals_and_stopped_statuses_map_to_distinct_codes() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGKILL.
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        // Stopped by SIGSTOP: neither an exit code nor a terminating signal.
        let stopped = exit_code(ExitStatus::from_raw(0x137f));
        assert_eq!(stopped, UNKNOWN_EXIT_CODE);
        assert_ne!(stopped, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn missing_program_yields_spawn_failure_code() {
        let spec = CommandSpec::new("nonexistent_command_12345");
        let result = ProcessRunner::new().run(&spec).await;

        assert_eq!(result.exit_code, SPAWN_FAILURE_EXIT_CODE);
        assert!(result.describe_exit().contains("could not be started"));
    }
}
