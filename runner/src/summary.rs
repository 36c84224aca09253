//! Final exit code summary printed after the loop.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::core::histogram::ExitCodeHistogram;
use crate::core::report::Report;

/// Print the ranked exit codes and return the most frequent one.
///
/// Fails with [`EmptyHistogram`](crate::core::report::EmptyHistogram) when no
/// iteration was recorded.
pub fn report<W: Write>(histogram: &ExitCodeHistogram, out: &mut W) -> Result<i32> {
    let report = match Report::from_histogram(histogram) {
        Ok(report) => report,
        Err(err) => {
            error!("the command didn't run even once");
            return Err(err.into());
        }
    };
    info!(
        exit_code = report.most_frequent(),
        runs = histogram.total(),
        "most frequent exit code"
    );
    out.write_all(report.render().as_bytes())
        .context("write summary")?;
    out.flush().context("flush summary")?;
    Ok(report.most_frequent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::EmptyHistogram;

    #[test]
    fn empty_histogram_surfaces_typed_error() {
        let mut out = Vec::new();
        let err = report(&ExitCodeHistogram::new(), &mut out).unwrap_err();
        assert!(err.downcast_ref::<EmptyHistogram>().is_some());
        assert!(out.is_empty());
    }

    #[test]
    fn report_is_idempotent() {
        let mut histogram = ExitCodeHistogram::new();
        histogram.record(1);
        histogram.record(0);
        histogram.record(1);

        let mut first = Vec::new();
        let mut second = Vec::new();
        assert_eq!(report(&histogram, &mut first).expect("report"), 1);
        assert_eq!(report(&histogram, &mut second).expect("report"), 1);
        assert_eq!(first, second);
        assert!(String::from_utf8_lossy(&first).starts_with("the most frequent exit code was 1\n"));
    }
}
