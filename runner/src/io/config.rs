//! Runner configuration loaded from an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::compose::{OUTPUT_PLACEHOLDER, PID_PLACEHOLDER, SINK_PLACEHOLDER, mentions};
use crate::core::plan::Sampler;

/// Runner configuration (TOML).
///
/// Missing fields default to values that drive the usual Linux tools
/// (`strace`, `pidstat`, `tcpdump`) found on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Argv prefix that interprets the command line (e.g. `["sh","-c"]`).
    pub shell: Vec<String>,

    /// Directory where per-iteration packet captures are written.
    pub artifact_dir: PathBuf,

    /// Keep at most this many bytes of each captured stream.
    pub output_limit_bytes: usize,

    /// Seconds an interrupted diagnostic process may take before it is killed.
    pub stop_grace_secs: u64,

    pub tools: ToolsConfig,
}

/// Argv templates for the external diagnostic tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// System-call tracer prefix; must mention `{sink}`.
    pub tracer: Vec<String>,
    /// Disk I/O sampler; must mention `{pid}`.
    pub disk: Vec<String>,
    /// Memory sampler; must mention `{pid}`.
    pub memory: Vec<String>,
    /// CPU sampler; must mention `{pid}`.
    pub cpu: Vec<String>,
    /// Packet capture; must mention `{output}`.
    pub capture: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tracer: argv(&["strace", "-o", SINK_PLACEHOLDER]),
            disk: argv(&["pidstat", "-d", "-p", PID_PLACEHOLDER, "1"]),
            memory: argv(&["pidstat", "-r", "-p", PID_PLACEHOLDER, "1"]),
            cpu: argv(&["pidstat", "-u", "-p", PID_PLACEHOLDER, "1"]),
            capture: argv(&["tcpdump", "-i", "any", "-w", OUTPUT_PLACEHOLDER]),
        }
    }
}

impl ToolsConfig {
    pub fn sampler(&self, sampler: Sampler) -> &[String] {
        match sampler {
            Sampler::Disk => &self.disk,
            Sampler::Memory => &self.memory,
            Sampler::Cpu => &self.cpu,
        }
    }

    fn validate(&self) -> Result<()> {
        check_template("tools.tracer", &self.tracer, SINK_PLACEHOLDER)?;
        for sampler in Sampler::ALL {
            let key = format!("tools.{}", sampler.name());
            check_template(&key, self.sampler(sampler), PID_PLACEHOLDER)?;
        }
        check_template("tools.capture", &self.capture, OUTPUT_PLACEHOLDER)
    }
}

fn check_template(key: &str, template: &[String], placeholder: &str) -> Result<()> {
    if template.is_empty() || template[0].trim().is_empty() {
        return Err(anyhow!("{key} must be a non-empty array"));
    }
    if !mentions(template, placeholder) {
        return Err(anyhow!("{key} must mention {placeholder}"));
    }
    Ok(())
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: argv(&["sh", "-c"]),
            artifact_dir: PathBuf::from("."),
            output_limit_bytes: 1_000_000,
            stop_grace_secs: 5,
            tools: ToolsConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(anyhow!("shell must be a non-empty array"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.stop_grace_secs == 0 {
            return Err(anyhow!("stop_grace_secs must be > 0"));
        }
        self.tools.validate()
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runner.toml");
        fs::write(
            &path,
            "artifact_dir = \"captures\"\n[tools]\ncpu = [\"top\", \"-p\", \"{pid}\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.artifact_dir, PathBuf::from("captures"));
        assert_eq!(cfg.tools.cpu, argv(&["top", "-p", "{pid}"]));
        assert_eq!(cfg.tools.disk, ToolsConfig::default().disk);
        assert_eq!(cfg.shell, argv(&["sh", "-c"]));
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runner.toml");
        fs::write(&path, "[tools]\ntracer = [\"strace\"]\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("tools.tracer must mention {sink}"));
    }

    #[test]
    fn zero_grace_is_rejected() {
        let cfg = RunnerConfig {
            stop_grace_secs: 0,
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
