//! Temporary sink shared by every iteration's system-call tracer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

/// One temporary file reused for the whole loop.
///
/// The tracer rewrites it on every traced iteration; [`CallTraceSink::reset`]
/// clears leftovers before each run. The file is deleted when the sink is
/// dropped, including when the loop halts early or returns an error.
#[derive(Debug)]
pub struct CallTraceSink {
    file: NamedTempFile,
}

impl CallTraceSink {
    pub fn create() -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("runner-calltrace-")
            .suffix(".log")
            .tempfile()
            .context("create call-trace sink")?;
        debug!(path = %file.path().display(), "created call-trace sink");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Truncate the sink so the next iteration starts from an empty log.
    pub fn reset(&self) -> Result<()> {
        self.file
            .as_file()
            .set_len(0)
            .with_context(|| format!("truncate {}", self.path().display()))
    }

    /// Read what the tracer wrote during the current iteration.
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(self.path()).with_context(|| format!("read {}", self.path().display()))
    }
}
