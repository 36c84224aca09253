//! Exit code frequency bookkeeping.

use std::collections::BTreeMap;

/// Mapping from exit code to the number of iterations that produced it.
///
/// Counts only grow; every recorded code has a count of at least one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitCodeHistogram {
    counts: BTreeMap<i32, u32>,
}

impl ExitCodeHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, exit_code: i32) {
        *self.counts.entry(exit_code).or_insert(0) += 1;
    }

    pub fn count(&self, exit_code: i32) -> u32 {
        self.counts.get(&exit_code).copied().unwrap_or(0)
    }

    /// Total number of recorded iterations.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Entries in ascending exit code order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        self.counts.iter().map(|(code, count)| (*code, *count))
    }
}
