pub mod audit;
pub mod process;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub use process::ProcessRunner;

/// Exit code recorded when a command was killed after exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code recorded when the program could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code recorded when the OS reported neither an exit code nor a
/// terminating signal.
pub const UNKNOWN_EXIT_CODE: i32 = -2;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A single external invocation: program plus a discrete argument list.
///
/// Arguments are never joined into a shell string, so image names and paths
/// taken from configuration cannot inject extra commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a spec from an argv vector whose first element is the program.
    pub fn from_argv(argv: &[String]) -> Self {
        let mut spec = Self::new(argv.first().cloned().unwrap_or_default());
        spec.args.extend(argv.iter().skip(1).cloned());
        spec
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Human-readable rendering for messages and hints. Not for execution.
    pub fn display(&self) -> String {
        self.argv()
            .iter()
            .map(|a| {
                if a.is_empty() || a.contains(char::is_whitespace) {
                    format!("'{}'", a.replace('\'', "'\\''"))
                } else {
                    a.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Last `n` non-empty lines of stdout followed by stderr.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let skip = lines.len().saturating_sub(n);
        lines[skip..].iter().map(|l| l.to_string()).collect()
    }

    /// Short description of how the command ended, for error messages.
    pub fn describe_exit(&self) -> String {
        if self.timed_out {
            format!("timed out after {:.1}s", self.duration.as_secs_f64())
        } else if self.exit_code == SPAWN_FAILURE_EXIT_CODE && self.stdout.is_empty() {
            format!("could not be started ({})", self.stderr.trim())
        } else {
            format!("exit {}", self.exit_code)
        }
    }
}

/// The boundary through which every container engine call passes.
///
/// Implementations never fail on a nonzero exit; callers inspect
/// [`CommandResult::exit_code`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> CommandResult;
}
