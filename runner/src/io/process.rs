//! Helpers for running child processes with bounded, concurrently drained output.

use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stderr", self.stderr_truncated)
    }

    /// Numeric exit code, or `128 + signal` when the process was killed.
    pub fn exit_code(&self) -> i32 {
        exit_code(self.status)
    }
}

fn truncated_notice(label: &str, stream: &str, truncated: usize) -> String {
    if truncated > 0 {
        format!("\n[{label} {stream} truncated {truncated} bytes]\n")
    } else {
        String::new()
    }
}

/// Map an exit status to a single integer using the shell convention for signals.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Build a command that interprets `line` with the configured shell argv.
pub fn shell_command(shell: &[String], line: &str) -> Result<Command> {
    let (program, args) = shell
        .split_first()
        .ok_or_else(|| anyhow!("shell argv must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(line);
    Ok(cmd)
}

/// Build a command from an already expanded argv.
pub fn argv_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("tool argv must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// A spawned process whose piped output is drained by reader threads.
///
/// Dropping a `RunningCommand` that was never waited on kills and reaps the
/// process, so error paths cannot leak it into the next iteration.
#[derive(Debug)]
pub struct RunningCommand {
    label: String,
    child: Child,
    stdout: Option<ReaderHandle>,
    stderr: Option<ReaderHandle>,
    reaped: bool,
}

/// Spawn `cmd`, piping stdout/stderr into bounded buffers when `capture` is set.
///
/// Uncaptured streams are inherited from the runner. `output_limit_bytes`
/// bounds each stored stream; extra bytes are drained and counted.
#[instrument(skip(cmd))]
pub fn spawn_command(
    mut cmd: Command,
    label: &str,
    capture: bool,
    output_limit_bytes: usize,
) -> Result<RunningCommand> {
    if capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {label}"));
        }
    };

    let stdout = child
        .stdout
        .take()
        .map(|out| thread::spawn(move || read_stream_limited(out, output_limit_bytes)));
    let stderr = child
        .stderr
        .take()
        .map(|err| thread::spawn(move || read_stream_limited(err, output_limit_bytes)));

    Ok(RunningCommand {
        label: label.to_string(),
        child,
        stdout,
        stderr,
        reaped: false,
    })
}

impl RunningCommand {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block until the process exits on its own, then collect its output.
    pub fn wait(mut self) -> Result<CommandOutput> {
        let status = self
            .child
            .wait()
            .with_context(|| format!("wait for {}", self.label))?;
        self.reaped = true;
        self.collect(status)
    }

    /// Ask the process to stop with SIGINT and reap it.
    ///
    /// SIGINT lets sampling and capture tools flush their summaries. A process
    /// still running after `grace` is killed. Either way this returns only
    /// after the process has been reaped.
    pub fn interrupt(mut self, grace: Duration) -> Result<CommandOutput> {
        let raw = i32::try_from(self.child.id())
            .with_context(|| format!("pid of {} out of range", self.label))?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGINT) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                return Err(e).with_context(|| format!("interrupt {}", self.label));
            }
        }

        let status = match self
            .child
            .wait_timeout(grace)
            .with_context(|| format!("wait for {}", self.label))?
        {
            Some(status) => status,
            None => {
                warn!(
                    label = %self.label,
                    grace_secs = grace.as_secs(),
                    "process ignored interrupt, killing"
                );
                self.child
                    .kill()
                    .with_context(|| format!("kill {}", self.label))?;
                self.child
                    .wait()
                    .with_context(|| format!("wait {} after kill", self.label))?
            }
        };
        self.reaped = true;
        self.collect(status)
    }

    fn collect(&mut self, status: ExitStatus) -> Result<CommandOutput> {
        let (stdout, stdout_truncated) = join_output(self.stdout.take())
            .with_context(|| format!("join {} stdout", self.label))?;
        let (stderr, stderr_truncated) = join_output(self.stderr.take())
            .with_context(|| format!("join {} stderr", self.label))?;

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(
                label = %self.label,
                stdout_truncated,
                stderr_truncated,
                "output truncated"
            );
        }

        debug!(label = %self.label, exit_code = exit_code(status), "process finished");
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!(label = %self.label, "reaping abandoned process");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn join_output(handle: Option<ReaderHandle>) -> Result<(Vec<u8>, usize)> {
    let Some(handle) = handle else {
        return Ok((Vec::new(), 0));
    };
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string()]
    }

    #[test]
    fn wait_captures_both_streams_and_exit_code() {
        let cmd = shell_command(&sh(), "echo out; echo err >&2; exit 3").expect("cmd");
        let output = spawn_command(cmd, "test", true, 1024)
            .expect("spawn")
            .wait()
            .expect("wait");
        assert_eq!(output.exit_code(), 3);
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
        assert_eq!(output.stdout_truncated_notice("test"), "");
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let cmd = shell_command(&sh(), "printf 0123456789").expect("cmd");
        let output = spawn_command(cmd, "test", true, 4)
            .expect("spawn")
            .wait()
            .expect("wait");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(
            output
                .stdout_truncated_notice("test")
                .contains("truncated 6 bytes")
        );
    }

    #[test]
    fn interrupt_runs_the_int_trap() {
        let cmd = shell_command(
            &sh(),
            "trap 'echo summary; exit 0' INT; echo started; while :; do sleep 0.05; done",
        )
        .expect("cmd");
        let running = spawn_command(cmd, "sampler", true, 1024).expect("spawn");
        thread::sleep(Duration::from_millis(200));
        let output = running.interrupt(Duration::from_secs(5)).expect("interrupt");
        assert_eq!(output.exit_code(), 0);
        assert_eq!(output.stdout, b"started\nsummary\n");
    }

    #[test]
    fn interrupt_kills_after_grace_period() {
        let cmd =
            shell_command(&sh(), "trap '' INT; while :; do sleep 0.05; done").expect("cmd");
        let running = spawn_command(cmd, "stubborn", true, 1024).expect("spawn");
        thread::sleep(Duration::from_millis(100));
        let output = running
            .interrupt(Duration::from_millis(200))
            .expect("interrupt");
        assert_eq!(output.exit_code(), 128 + 9);
    }

    #[test]
    fn interrupt_after_exit_still_collects() {
        let cmd = shell_command(&sh(), "echo done").expect("cmd");
        let running = spawn_command(cmd, "quick", true, 1024).expect("spawn");
        thread::sleep(Duration::from_millis(200));
        let output = running.interrupt(Duration::from_secs(1)).expect("interrupt");
        assert_eq!(output.stdout, b"done\n");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let cmd = argv_command(&["/nonexistent/tool".to_string()]).expect("cmd");
        assert!(spawn_command(cmd, "tool", true, 16).is_err());
    }
}
