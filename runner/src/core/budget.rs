//! Failure budget accounting for the execution loop.

/// Classification of one finished iteration against the failure budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The command exited with status zero.
    Success,
    /// The command failed and the budget absorbed it.
    Tolerated { remaining: u32 },
    /// The command failed with no budget left; the loop must halt.
    Exhausted,
}

/// Counter of failing iterations the loop may still tolerate.
///
/// Decremented by exactly one per tolerated failure and never below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBudget {
    remaining: u32,
}

impl FailureBudget {
    pub fn new(allowed_failures: u32) -> Self {
        Self {
            remaining: allowed_failures,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Account for an observed exit code.
    ///
    /// The budget is checked before it is charged: a failure observed at zero
    /// remaining yields `Exhausted` and leaves the counter at zero.
    pub fn observe(&mut self, exit_code: i32) -> Verdict {
        if exit_code == 0 {
            return Verdict::Success;
        }
        if self.remaining == 0 {
            return Verdict::Exhausted;
        }
        self.remaining -= 1;
        Verdict::Tolerated {
            remaining: self.remaining,
        }
    }
}
