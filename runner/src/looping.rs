//! Repeated execution of the wrapped command under a failure budget.
//!
//! Each iteration starts the enabled attachers, runs the command through the
//! shell, stops the attachers in reverse start order and only then decides
//! whether to continue, print diagnostics, or halt. Iterations never overlap.

use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{FailureBudget, Verdict};
use crate::core::compose::{TraceWrap, compose};
use crate::core::histogram::ExitCodeHistogram;
use crate::core::plan::{AttachPlan, Section};
use crate::core::types::{RunConfiguration, RunResult};
use crate::io::attach::{
    AttachContext, AttachPoint, Attacher, AttacherError, AttacherPhase, Attachment, Captured,
    build_attachers,
};
use crate::io::call_trace::CallTraceSink;
use crate::io::config::RunnerConfig;
use crate::io::process::{shell_command, spawn_command};
use crate::summary;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every configured iteration ran.
    Completed,
    /// A failure arrived with no budget left.
    Halted { iteration: u32, exit_code: i32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
}

/// Inputs shared by every iteration of one loop.
pub struct LoopContext<'a> {
    pub config: &'a RunConfiguration,
    pub settings: &'a RunnerConfig,
    /// Attachers in start order; they are stopped in reverse.
    pub attachers: &'a [Box<dyn Attacher>],
}

/// Run the loop with the attachers implied by the configured flags, then
/// print the summary and return the most frequent exit code.
///
/// The summary is printed even when the loop aborts, as long as at least one
/// iteration was recorded; the loop's error still takes precedence.
pub fn execute<W: Write>(
    config: &RunConfiguration,
    settings: &RunnerConfig,
    out: &mut W,
) -> Result<i32> {
    let plan = AttachPlan::from_flags(&config.flags);
    let attachers = build_attachers(&plan, settings);
    let ctx = LoopContext {
        config,
        settings,
        attachers: &attachers,
    };

    let mut histogram = ExitCodeHistogram::new();
    let loop_result = run_loop(&ctx, &mut histogram, out);
    let report_result = summary::report(&histogram, out);
    loop_result?;
    report_result
}

/// Execute the command up to `total_runs` times, folding exit codes into
/// `histogram`.
///
/// Failures are charged to the failure budget. A tolerated failure prints the
/// enabled diagnostic panels; the failure that finds the budget empty halts
/// the loop without printing them. Errors from the runner itself (spawn,
/// attacher or artifact failures) abort the loop; the histogram keeps every
/// iteration recorded so far.
#[instrument(skip_all, fields(total_runs = ctx.config.total_runs, failure_budget = ctx.config.failure_budget))]
pub fn run_loop<W: Write>(
    ctx: &LoopContext<'_>,
    histogram: &mut ExitCodeHistogram,
    out: &mut W,
) -> Result<LoopOutcome> {
    let config = ctx.config;
    let plan = AttachPlan::from_flags(&config.flags);
    let mut budget = FailureBudget::new(config.failure_budget);
    let sink = if plan.call_trace && config.total_runs > 0 {
        Some(CallTraceSink::create()?)
    } else {
        None
    };

    for iteration in 1..=config.total_runs {
        debug!(iteration, "executing command");
        let (result, captured) = run_iteration(ctx, &plan, sink.as_ref(), iteration)?;
        histogram.record(result.exit_code);

        match budget.observe(result.exit_code) {
            Verdict::Success => discard_artifacts(&captured)?,
            Verdict::Exhausted => {
                info!(
                    iteration,
                    exit_code = result.exit_code,
                    "reached max failed attempts, giving up"
                );
                return Ok(LoopOutcome {
                    iterations: iteration,
                    stop: LoopStop::Halted {
                        iteration,
                        exit_code: result.exit_code,
                    },
                });
            }
            Verdict::Tolerated { remaining } => {
                debug!(
                    iteration,
                    exit_code = result.exit_code,
                    remaining,
                    "command failed"
                );
                print_panels(out, &plan, &result, &captured).context("print diagnostics")?;
            }
        }
    }

    Ok(LoopOutcome {
        iterations: config.total_runs,
        stop: LoopStop::Completed,
    })
}

/// Run one iteration: attach, execute, wait, detach.
///
/// Returns only after every attachment has been stopped. On an early error the
/// attachments and child still alive are killed and reaped when dropped.
fn run_iteration(
    ctx: &LoopContext<'_>,
    plan: &AttachPlan,
    sink: Option<&CallTraceSink>,
    iteration: u32,
) -> Result<(RunResult, Vec<Captured>)> {
    let settings = ctx.settings;
    if let Some(sink) = sink {
        sink.reset()?;
    }

    let mut active: Vec<(&str, Box<dyn Attachment>)> = Vec::new();
    let before = AttachContext {
        iteration,
        child_pid: None,
        artifact_dir: &settings.artifact_dir,
    };
    start_attachers(ctx.attachers, AttachPoint::BeforeChild, &before, &mut active)?;

    let line = compose(
        &ctx.config.command,
        sink.map(|sink| TraceWrap {
            tracer: &settings.tools.tracer,
            sink: sink.path(),
        }),
    );
    let cmd = shell_command(&settings.shell, &line)?;
    let child = spawn_command(cmd, "command", plan.log_trace, settings.output_limit_bytes)
        .context("launch command")?;

    let after = AttachContext {
        child_pid: Some(child.id()),
        ..before
    };
    start_attachers(ctx.attachers, AttachPoint::AfterSpawn, &after, &mut active)?;

    let output = child.wait()?;
    let mut captured = stop_attachments(active, iteration)?;

    if let Some(sink) = sink {
        captured.push(Captured {
            section: Section::SystemCalls,
            text: sink.read()?,
            artifact: None,
        });
    }

    let (stdout, stderr) = if plan.log_trace {
        let mut stdout = output.stdout.clone();
        stdout.extend_from_slice(output.stdout_truncated_notice("command").as_bytes());
        let mut stderr = output.stderr.clone();
        stderr.extend_from_slice(output.stderr_truncated_notice("command").as_bytes());
        (Some(stdout), Some(stderr))
    } else {
        (None, None)
    };

    let result = RunResult {
        iteration,
        exit_code: output.exit_code(),
        stdout,
        stderr,
    };
    Ok((result, captured))
}

fn start_attachers<'a>(
    attachers: &'a [Box<dyn Attacher>],
    point: AttachPoint,
    ctx: &AttachContext<'_>,
    active: &mut Vec<(&'a str, Box<dyn Attachment>)>,
) -> Result<()> {
    for attacher in attachers.iter().filter(|a| a.attach_point() == point) {
        let attachment = attacher.start(ctx).map_err(|source| {
            AttacherError::new(attacher.name(), AttacherPhase::Launch, ctx.iteration, source)
        })?;
        active.push((attacher.name(), attachment));
    }
    Ok(())
}

/// Stop attachments in reverse start order.
///
/// Every attachment is stopped even if an earlier one fails; the first
/// failure is returned afterwards.
fn stop_attachments(
    mut active: Vec<(&str, Box<dyn Attachment>)>,
    iteration: u32,
) -> Result<Vec<Captured>> {
    let mut captured = Vec::with_capacity(active.len());
    let mut first_err: Option<AttacherError> = None;
    while let Some((name, attachment)) = active.pop() {
        match attachment.stop() {
            Ok(output) => captured.push(output),
            Err(source) => {
                warn!(attacher = name, iteration, err = %source, "failed to stop attacher");
                if first_err.is_none() {
                    first_err = Some(AttacherError::new(
                        name,
                        AttacherPhase::Teardown,
                        iteration,
                        source,
                    ));
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err.into()),
        None => Ok(captured),
    }
}

/// Delete artifacts of a successful iteration; missing files are ignored.
fn discard_artifacts(captured: &[Captured]) -> Result<()> {
    for path in captured.iter().filter_map(|c| c.artifact.as_ref()) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed artifact of successful run"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", path.display()));
            }
        }
    }
    Ok(())
}

/// Print the enabled panels for a failing iteration in fixed section order.
fn print_panels<W: Write>(
    out: &mut W,
    plan: &AttachPlan,
    result: &RunResult,
    captured: &[Captured],
) -> io::Result<()> {
    let mut panels: Vec<(Section, &[u8])> = captured
        .iter()
        .filter(|c| plan.prints(c.section))
        .map(|c| (c.section, c.text.as_slice()))
        .collect();
    if let Some(stdout) = &result.stdout {
        panels.push((Section::Stdout, stdout));
    }
    if let Some(stderr) = &result.stderr {
        panels.push((Section::Stderr, stderr));
    }
    panels.sort_by_key(|(section, _)| *section);

    for (section, text) in panels {
        writeln!(out, "{}", section.header())?;
        out.write_all(text)?;
        if !text.is_empty() && !text.ends_with(b"\n") {
            writeln!(out)?;
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TraceFlags;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Events = Rc<RefCell<Vec<String>>>;

    /// Attacher that records lifecycle events instead of spawning processes.
    struct RecordingAttacher {
        name: &'static str,
        point: AttachPoint,
        section: Section,
        events: Events,
        fail_stop: bool,
    }

    struct RecordingAttachment {
        name: &'static str,
        iteration: u32,
        section: Section,
        events: Events,
        fail_stop: bool,
    }

    impl Attacher for RecordingAttacher {
        fn name(&self) -> &str {
            self.name
        }

        fn attach_point(&self) -> AttachPoint {
            self.point
        }

        fn start(&self, ctx: &AttachContext<'_>) -> Result<Box<dyn Attachment>> {
            let pid = if ctx.child_pid.is_some() { "pid" } else { "nopid" };
            self.events
                .borrow_mut()
                .push(format!("start {} {} {pid}", self.name, ctx.iteration));
            Ok(Box::new(RecordingAttachment {
                name: self.name,
                iteration: ctx.iteration,
                section: self.section,
                events: self.events.clone(),
                fail_stop: self.fail_stop,
            }))
        }
    }

    impl Attachment for RecordingAttachment {
        fn stop(self: Box<Self>) -> Result<Captured> {
            self.events
                .borrow_mut()
                .push(format!("stop {} {}", self.name, self.iteration));
            if self.fail_stop {
                anyhow::bail!("stuck");
            }
            Ok(Captured {
                section: self.section,
                text: format!("{} panel\n", self.name).into_bytes(),
                artifact: None,
            })
        }
    }

    fn recording(
        name: &'static str,
        point: AttachPoint,
        section: Section,
        events: &Events,
    ) -> Box<dyn Attacher> {
        Box::new(RecordingAttacher {
            name,
            point,
            section,
            events: events.clone(),
            fail_stop: false,
        })
    }

    fn run(
        config: &RunConfiguration,
        attachers: &[Box<dyn Attacher>],
    ) -> (Result<LoopOutcome>, ExitCodeHistogram, String) {
        let settings = RunnerConfig::default();
        let ctx = LoopContext {
            config,
            settings: &settings,
            attachers,
        };
        let mut histogram = ExitCodeHistogram::new();
        let mut out = Vec::new();
        let outcome = run_loop(&ctx, &mut histogram, &mut out);
        (outcome, histogram, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn always_succeeding_command_completes() {
        let config = RunConfiguration::new("true", 4, None, TraceFlags::default());
        let (outcome, histogram, out) = run(&config, &[]);

        let outcome = outcome.expect("loop");
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.iterations, 4);
        assert_eq!(histogram.count(0), 4);
        assert_eq!(histogram.total(), 4);
        assert!(out.is_empty());
    }

    #[test]
    fn always_failing_command_halts_after_budget_plus_one() {
        let config = RunConfiguration::new("exit 3", 10, Some(2), TraceFlags::default());
        let (outcome, histogram, _) = run(&config, &[]);

        assert_eq!(
            outcome.expect("loop"),
            LoopOutcome {
                iterations: 3,
                stop: LoopStop::Halted {
                    iteration: 3,
                    exit_code: 3
                },
            }
        );
        assert_eq!(histogram.count(3), 3);
        assert_eq!(histogram.total(), 3);
    }

    #[test]
    fn zero_runs_execute_nothing() {
        let config = RunConfiguration::new("true", 0, None, TraceFlags::default());
        let (outcome, histogram, _) = run(&config, &[]);
        assert_eq!(outcome.expect("loop").iterations, 0);
        assert!(histogram.is_empty());
    }

    #[test]
    fn attachers_stop_in_reverse_before_next_iteration() {
        let events = Events::default();
        let attachers = vec![
            recording("capture", AttachPoint::BeforeChild, Section::NetworkCounters, &events),
            recording("disk", AttachPoint::AfterSpawn, Section::DiskIo, &events),
            recording("cpu", AttachPoint::AfterSpawn, Section::Cpu, &events),
        ];
        let config = RunConfiguration::new("true", 2, None, TraceFlags::default());
        let (outcome, _, _) = run(&config, &attachers);
        outcome.expect("loop");

        assert_eq!(
            *events.borrow(),
            vec![
                "start capture 1 nopid",
                "start disk 1 pid",
                "start cpu 1 pid",
                "stop cpu 1",
                "stop disk 1",
                "stop capture 1",
                "start capture 2 nopid",
                "start disk 2 pid",
                "start cpu 2 pid",
                "stop cpu 2",
                "stop disk 2",
                "stop capture 2",
            ]
        );
    }

    #[test]
    fn panels_print_in_fixed_order_for_tolerated_failures_only() {
        let events = Events::default();
        let attachers = vec![
            recording("capture", AttachPoint::BeforeChild, Section::NetworkCounters, &events),
            recording("cpu", AttachPoint::AfterSpawn, Section::Cpu, &events),
            recording("disk", AttachPoint::AfterSpawn, Section::DiskIo, &events),
        ];
        let flags = TraceFlags {
            sys_trace: true,
            log_trace: true,
            ..TraceFlags::default()
        };
        let config = RunConfiguration::new("echo hello && false", 3, Some(1), flags);
        let (outcome, histogram, out) = run(&config, &attachers);

        assert_eq!(outcome.expect("loop").iterations, 2);
        assert_eq!(histogram.count(1), 2);
        assert_eq!(
            out,
            "Disk IO:\ndisk panel\nCPU usage:\ncpu panel\n\
             Network package counters:\ncapture panel\nstdout:\nhello\nstderr:\n"
        );
    }

    #[test]
    fn failed_teardown_stops_remaining_attachers_then_errors() {
        let events = Events::default();
        let attachers: Vec<Box<dyn Attacher>> = vec![
            recording("capture", AttachPoint::BeforeChild, Section::NetworkCounters, &events),
            Box::new(RecordingAttacher {
                name: "disk",
                point: AttachPoint::AfterSpawn,
                section: Section::DiskIo,
                events: events.clone(),
                fail_stop: true,
            }),
        ];
        let config = RunConfiguration::new("true", 3, None, TraceFlags::default());
        let (outcome, histogram, _) = run(&config, &attachers);

        let err = outcome.unwrap_err();
        let attacher_err = err.downcast_ref::<AttacherError>().expect("attacher error");
        assert_eq!(attacher_err.attacher, "disk");
        assert_eq!(attacher_err.phase, AttacherPhase::Teardown);
        assert!(events.borrow().contains(&"stop capture 1".to_string()));
        assert!(histogram.is_empty());
    }

    #[test]
    fn success_discards_artifacts_and_failure_keeps_them() {
        let temp = tempfile::tempdir().expect("tempdir");
        let kept = temp.path().join("kept.pcap");
        let removed = temp.path().join("removed.pcap");
        fs::write(&kept, "x").expect("write");
        fs::write(&removed, "x").expect("write");

        discard_artifacts(&[Captured {
            section: Section::NetworkCounters,
            text: Vec::new(),
            artifact: Some(removed.clone()),
        }])
        .expect("discard");
        discard_artifacts(&[Captured {
            section: Section::NetworkCounters,
            text: Vec::new(),
            artifact: Some(temp.path().join("never-written.pcap")),
        }])
        .expect("missing artifact is fine");

        assert!(!removed.exists());
        assert!(kept.exists());
    }
}
