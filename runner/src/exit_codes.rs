//! Exit codes owned by the runner itself.
//!
//! On a normal run the runner exits with the most frequent exit code of the
//! wrapped command, so these only apply when that code does not exist.

/// The runner could not produce a result: no iteration ran, the
/// configuration was invalid, or a diagnostic process failed.
pub const RUNNER_ERROR: i32 = 125;
