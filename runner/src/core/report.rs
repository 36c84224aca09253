//! Ranking of the exit code histogram into the final summary.

use std::fmt;

use crate::core::histogram::ExitCodeHistogram;

/// No iteration ran, so there is no exit code to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyHistogram;

impl fmt::Display for EmptyHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the command didn't run even once")
    }
}

impl std::error::Error for EmptyHistogram {}

/// Exit codes ranked by how often they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    ranked: Vec<(i32, u32)>,
}

impl Report {
    /// Rank histogram entries by count, most frequent first.
    ///
    /// The histogram iterates in ascending code order and the sort is stable,
    /// so codes with equal counts stay in ascending code order.
    pub fn from_histogram(histogram: &ExitCodeHistogram) -> Result<Self, EmptyHistogram> {
        if histogram.is_empty() {
            return Err(EmptyHistogram);
        }
        let mut ranked: Vec<(i32, u32)> = histogram.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(Self { ranked })
    }

    pub fn most_frequent(&self) -> i32 {
        self.ranked[0].0
    }

    pub fn ranked(&self) -> &[(i32, u32)] {
        &self.ranked
    }

    /// Summary line followed by the full breakdown, newline terminated.
    pub fn render(&self) -> String {
        let mut out = format!(
            "the most frequent exit code was {}\n",
            self.most_frequent()
        );
        for (code, count) in &self.ranked {
            let noun = if *count == 1 { "run" } else { "runs" };
            out.push_str(&format!("exit code {code}: {count} {noun}\n"));
        }
        out
    }
}
