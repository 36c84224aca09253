//! Test-only fake diagnostic tools.
//!
//! The scripts mimic the parts of `strace`, `pidstat` and `tcpdump` output the
//! runner forwards, so loop behavior can be tested on hosts without them.
//! Scripts are run through `sh` rather than executed directly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::config::{RunnerConfig, ToolsConfig};

/// Marker printed by the fake disk sampler.
pub const DISK_MARKER: &str = "kB_rd/s";
/// Marker printed by the fake memory sampler.
pub const MEMORY_MARKER: &str = "%MEM";
/// Marker printed by the fake CPU sampler.
pub const CPU_MARKER: &str = "%CPU";
/// Marker printed by the fake packet capture when interrupted.
pub const PACKETS_MARKER: &str = "packets captured";

const TRACER: &str = r#"sink="$2"
shift 2
{
  printf 'execve("/usr/bin/%s", [' "$1"
  sep=''
  for arg in "$@"; do
    printf '%s"%s"' "$sep" "$arg"
    sep=', '
  done
  printf '], 0x0 /* 0 vars */) = 0\n'
} > "$sink"
exec "$@"
"#;

const SAMPLER: &str = r#"trap 'echo "Average: $1 $2"; exit 0' INT TERM
echo "PID $2"
while :; do sleep 0.05; done
"#;

const CAPTURE: &str = r#"trap 'echo "3 packets captured" >&2; exit 0' INT TERM
echo "fake pcap" > "$1"
echo "listening on any" >&2
while :; do sleep 0.05; done
"#;

/// Temporary directory holding fake tool scripts and an artifact directory.
pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create fake tools dir")?;
        for (name, body) in [
            ("tracer.sh", TRACER),
            ("sampler.sh", SAMPLER),
            ("capture.sh", CAPTURE),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        }
        fs::create_dir_all(dir.path().join("artifacts")).context("create artifacts dir")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    /// Runner configuration wired to the fake tools.
    pub fn config(&self) -> RunnerConfig {
        RunnerConfig {
            artifact_dir: self.artifact_dir(),
            tools: ToolsConfig {
                tracer: self.script("tracer.sh", &["-o", "{sink}"]),
                disk: self.script("sampler.sh", &["{pid}", DISK_MARKER]),
                memory: self.script("sampler.sh", &["{pid}", MEMORY_MARKER]),
                cpu: self.script("sampler.sh", &["{pid}", CPU_MARKER]),
                capture: self.script("capture.sh", &["{output}"]),
            },
            ..RunnerConfig::default()
        }
    }

    /// Write the fake configuration as TOML and return its path.
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.dir.path().join("runner.toml");
        let body = toml::to_string_pretty(&self.config()).context("serialize config toml")?;
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn script(&self, name: &str, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            "sh".to_string(),
            self.dir.path().join(name).to_string_lossy().into_owned(),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));
        argv
    }
}
