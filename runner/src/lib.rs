//! Repeated shell command runner with a failure budget and diagnostics.
//!
//! The runner executes a command a configured number of times, tolerates a
//! bounded number of failing runs, optionally attaches diagnostics to every
//! run (system-call tracing, resource sampling, packet capture, output
//! capture), and reports the most frequent exit code. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (budget, histogram, composition,
//!   attach planning, ranking). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (child processes, diagnostic
//!   attachers, temporary files, configuration).
//!
//! [`looping`] drives iterations and [`summary`] prints the final report.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
