//! Scripted command runner used by unit tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{CommandResult, CommandRunner, CommandSpec, TIMEOUT_EXIT_CODE};

struct Rule {
    needle: Vec<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Answers commands by matching a contiguous run of argv words and records
/// every invocation. Unmatched commands succeed with empty output. The first
/// matching rule wins.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: &[&str], exit_code: i32, stdout: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.iter().map(|s| s.to_string()).collect(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
        self
    }

    pub fn fail(mut self, needle: &[&str], exit_code: i32, stderr: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.iter().map(|s| s.to_string()).collect(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn argvs(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.argv().join(" ")).collect()
    }

    pub fn invoked(&self, needle: &[&str]) -> bool {
        self.calls().iter().any(|c| contains(&c.argv(), needle))
    }

    /// Index of the first invocation matching `needle`.
    pub fn position(&self, needle: &[&str]) -> Option<usize> {
        self.calls().iter().position(|c| contains(&c.argv(), needle))
    }
}

fn contains(argv: &[&str], needle: &[impl AsRef<str>]) -> bool {
    if needle.is_empty() || needle.len() > argv.len() {
        return needle.is_empty();
    }
    argv.windows(needle.len())
        .any(|w| w.iter().zip(needle).all(|(a, b)| *a == b.as_ref()))
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandResult {
        self.calls.lock().unwrap().push(spec.clone());

        let argv = spec.argv();
        let rule = self.rules.iter().find(|r| contains(&argv, r.needle.as_slice()));
        let (exit_code, stdout, stderr) = match rule {
            Some(r) => (r.exit_code, r.stdout.clone(), r.stderr.clone()),
            None => (0, String::new(), String::new()),
        };

        CommandResult {
            command: spec.display(),
            exit_code,
            stdout,
            stderr,
            duration: Duration::from_millis(1),
            timed_out: exit_code == TIMEOUT_EXIT_CODE,
        }
    }
}
