//! Diagnostic attachers: processes that observe one iteration of the command.
//!
//! The [`Attacher`] trait decouples the execution loop from the concrete
//! tools. The default attachers spawn the tools named in [`ToolsConfig`];
//! tests substitute scripted attachers or fake tool scripts.
//!
//! [`ToolsConfig`]: crate::io::config::ToolsConfig

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::core::compose::{OUTPUT_PLACEHOLDER, PID_PLACEHOLDER, expand};
use crate::core::plan::{AttachPlan, CaptureMode, Sampler, Section};
use crate::io::config::RunnerConfig;
use crate::io::process::{RunningCommand, argv_command, spawn_command};

/// When an attacher must be started relative to the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPoint {
    /// Before the child is spawned (e.g. packet capture).
    BeforeChild,
    /// Right after the child is spawned, once its pid is known.
    AfterSpawn,
}

/// Per-iteration inputs handed to [`Attacher::start`].
#[derive(Debug, Clone, Copy)]
pub struct AttachContext<'a> {
    /// 1-indexed iteration number.
    pub iteration: u32,
    /// Pid of the child; `None` for [`AttachPoint::BeforeChild`] attachers.
    pub child_pid: Option<u32>,
    /// Directory for artifacts that may outlive the iteration.
    pub artifact_dir: &'a Path,
}

/// Output collected from a stopped attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub section: Section,
    pub text: Vec<u8>,
    /// File that survives the attachment, subject to the retention policy.
    pub artifact: Option<PathBuf>,
}

/// Factory for per-iteration diagnostic processes.
pub trait Attacher {
    fn name(&self) -> &str;
    fn attach_point(&self) -> AttachPoint;
    /// Launch the diagnostic for one iteration.
    fn start(&self, ctx: &AttachContext<'_>) -> Result<Box<dyn Attachment>>;
}

/// A running diagnostic scoped to one iteration.
pub trait Attachment {
    /// Terminate the diagnostic and return its output.
    ///
    /// Must not return before the underlying process has exited.
    fn stop(self: Box<Self>) -> Result<Captured>;
}

/// Lifecycle step in which an attacher failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttacherPhase {
    Launch,
    Teardown,
}

/// A diagnostic process could not be launched or torn down.
///
/// Kept distinct from a failing child: it aborts the loop instead of being
/// charged to the failure budget.
#[derive(Debug)]
pub struct AttacherError {
    pub attacher: String,
    pub phase: AttacherPhase,
    pub iteration: u32,
    source: anyhow::Error,
}

impl AttacherError {
    pub fn new(
        attacher: impl Into<String>,
        phase: AttacherPhase,
        iteration: u32,
        source: anyhow::Error,
    ) -> Self {
        Self {
            attacher: attacher.into(),
            phase,
            iteration,
            source,
        }
    }
}

impl fmt::Display for AttacherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.phase {
            AttacherPhase::Launch => "launch",
            AttacherPhase::Teardown => "stop",
        };
        write!(
            f,
            "failed to {action} {} attacher on iteration {}",
            self.attacher, self.iteration
        )
    }
}

impl std::error::Error for AttacherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = &*self.source;
        Some(source)
    }
}

/// File name of the packet capture for `iteration`.
pub fn capture_file_name(iteration: u32) -> String {
    format!("traffic_on_num_{iteration}_execute.pcap")
}

pub fn capture_path(artifact_dir: &Path, iteration: u32) -> PathBuf {
    artifact_dir.join(capture_file_name(iteration))
}

/// Build the attachers an [`AttachPlan`] asks for, in start order.
pub fn build_attachers(plan: &AttachPlan, cfg: &RunnerConfig) -> Vec<Box<dyn Attacher>> {
    let mut attachers: Vec<Box<dyn Attacher>> = Vec::new();
    if let Some(mode) = plan.capture {
        attachers.push(Box::new(CaptureAttacher {
            template: cfg.tools.capture.clone(),
            mode,
            output_limit_bytes: cfg.output_limit_bytes,
            grace: cfg.stop_grace(),
        }));
    }
    for sampler in &plan.samplers {
        attachers.push(Box::new(SamplerAttacher {
            sampler: *sampler,
            template: cfg.tools.sampler(*sampler).to_vec(),
            output_limit_bytes: cfg.output_limit_bytes,
            grace: cfg.stop_grace(),
        }));
    }
    attachers
}

/// Resource sampler bound to the child's pid.
#[derive(Debug, Clone)]
pub struct SamplerAttacher {
    pub sampler: Sampler,
    pub template: Vec<String>,
    pub output_limit_bytes: usize,
    pub grace: Duration,
}

impl Attacher for SamplerAttacher {
    fn name(&self) -> &str {
        self.sampler.name()
    }

    fn attach_point(&self) -> AttachPoint {
        AttachPoint::AfterSpawn
    }

    #[instrument(skip_all, fields(sampler = self.sampler.name(), iteration = ctx.iteration))]
    fn start(&self, ctx: &AttachContext<'_>) -> Result<Box<dyn Attachment>> {
        let pid = ctx
            .child_pid
            .ok_or_else(|| anyhow!("{} sampler needs the child pid", self.sampler.name()))?;
        let argv = expand(&self.template, PID_PLACEHOLDER, &pid.to_string());
        let running = spawn_tool(&argv, self.sampler.name(), self.output_limit_bytes)?;
        debug!(pid, "sampler attached");
        Ok(Box::new(ProcessAttachment {
            section: self.sampler.section(),
            running,
            grace: self.grace,
            artifact: None,
            _scratch: None,
        }))
    }
}

/// Packet capture shared by sys-trace counters and net-trace artifacts.
#[derive(Debug, Clone)]
pub struct CaptureAttacher {
    pub template: Vec<String>,
    pub mode: CaptureMode,
    pub output_limit_bytes: usize,
    pub grace: Duration,
}

impl Attacher for CaptureAttacher {
    fn name(&self) -> &str {
        "capture"
    }

    fn attach_point(&self) -> AttachPoint {
        AttachPoint::BeforeChild
    }

    #[instrument(skip_all, fields(mode = ?self.mode, iteration = ctx.iteration))]
    fn start(&self, ctx: &AttachContext<'_>) -> Result<Box<dyn Attachment>> {
        let (output, artifact, scratch) = match self.mode {
            CaptureMode::Persist => {
                let path = capture_path(ctx.artifact_dir, ctx.iteration);
                (path.clone(), Some(path), None)
            }
            CaptureMode::Counters => {
                let scratch = tempfile::Builder::new()
                    .prefix("runner-capture-")
                    .suffix(".pcap")
                    .tempfile()
                    .context("create scratch capture file")?;
                (scratch.path().to_path_buf(), None, Some(scratch))
            }
        };
        let argv = expand(&self.template, OUTPUT_PLACEHOLDER, &output.to_string_lossy());
        let running = spawn_tool(&argv, "capture", self.output_limit_bytes)?;
        debug!(output = %output.display(), "capture attached");
        Ok(Box::new(ProcessAttachment {
            section: Section::NetworkCounters,
            running,
            grace: self.grace,
            artifact,
            _scratch: scratch,
        }))
    }
}

fn spawn_tool(argv: &[String], label: &str, output_limit_bytes: usize) -> Result<RunningCommand> {
    let mut cmd = argv_command(argv)?;
    cmd.stdin(Stdio::null());
    spawn_command(cmd, label, true, output_limit_bytes)
}

/// Attachment backed by one tool process, stopped with SIGINT.
struct ProcessAttachment {
    section: Section,
    running: RunningCommand,
    grace: Duration,
    artifact: Option<PathBuf>,
    /// Scratch capture file removed once the attachment is stopped.
    _scratch: Option<NamedTempFile>,
}

impl Attachment for ProcessAttachment {
    fn stop(self: Box<Self>) -> Result<Captured> {
        let this = *self;
        let label = this.running.label().to_string();
        let output = this.running.interrupt(this.grace)?;
        let mut text = output.stdout.clone();
        text.extend_from_slice(output.stdout_truncated_notice(&label).as_bytes());
        text.extend_from_slice(&output.stderr);
        text.extend_from_slice(output.stderr_truncated_notice(&label).as_bytes());
        Ok(Captured {
            section: this.section,
            text,
            artifact: this.artifact,
        })
    }
}
