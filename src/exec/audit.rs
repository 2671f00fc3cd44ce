//! Audit trail for external commands.
//!
//! Every invocation is emitted on the `audit` tracing target, whatever its
//! outcome. `main` routes that target to the console or to an append-only
//! file, which is the only artifact a run leaves behind.

use tracing::info;

use super::{CommandResult, CommandSpec};

pub const TARGET: &str = "audit";

/// Per-stream cap on captured output written to the audit trail.
pub const OUTPUT_LIMIT: usize = 4096;

pub fn record(spec: &CommandSpec, result: &CommandResult) {
    info!(
        target: TARGET,
        program = %spec.program,
        args = ?spec.args,
        exit_code = result.exit_code,
        duration_ms = result.duration.as_millis() as u64,
        timed_out = result.timed_out,
        stdout = %truncate(&result.stdout, OUTPUT_LIMIT),
        stderr = %truncate(&result.stderr, OUTPUT_LIMIT),
        "command finished"
    );
}

/// Keep the last `limit` bytes of `s`, cut on a char boundary.
pub fn truncate(s: &str, limit: usize) -> String {
    let s = s.trim_end();
    if s.len() <= limit {
        return s.to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &s[start..])
}
