//! Shared deterministic types for the execution loop.
//!
//! These types are built once from CLI input and never change while the loop
//! runs.

/// Independent diagnostic switches requested on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFlags {
    /// Sample disk/memory/CPU usage of the child and count network packets.
    pub sys_trace: bool,
    /// Record the child's system calls into a temporary sink.
    pub call_trace: bool,
    /// Capture the child's stdout/stderr instead of passing them through.
    pub log_trace: bool,
    /// Persist a packet capture per iteration, kept only when it fails.
    pub net_trace: bool,
}

/// Immutable description of one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    /// Shell command line to execute on every iteration.
    pub command: String,
    /// Number of iterations to attempt. Zero performs no iterations.
    pub total_runs: u32,
    /// Number of failing iterations tolerated before the loop halts.
    pub failure_budget: u32,
    pub flags: TraceFlags,
}

impl RunConfiguration {
    /// Build a configuration; an unset failure budget defaults to `total_runs`.
    pub fn new(
        command: impl Into<String>,
        total_runs: u32,
        failure_budget: Option<u32>,
        flags: TraceFlags,
    ) -> Self {
        Self {
            command: command.into(),
            total_runs,
            failure_budget: failure_budget.unwrap_or(total_runs),
            flags,
        }
    }
}

/// Outcome of a single execution of the wrapped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// 1-indexed iteration number.
    pub iteration: u32,
    pub exit_code: i32,
    /// Captured stdout, present only when log tracing is enabled.
    pub stdout: Option<Vec<u8>>,
    /// Captured stderr, present only when log tracing is enabled.
    pub stderr: Option<Vec<u8>>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}
