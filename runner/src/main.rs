//! Repeated shell command runner.
//!
//! Executes a command `--count` times, gives up after `--failed-count` failed
//! runs, and exits with the most frequent exit code.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use runner::core::types::{RunConfiguration, TraceFlags};
use runner::exit_codes;
use runner::io::config::{RunnerConfig, load_config};
use runner::logging;
use runner::looping::execute;

#[derive(Parser)]
#[command(
    name = "runner",
    version,
    about = "Run a shell command repeatedly and report its most frequent exit code"
)]
struct Cli {
    /// The command to execute (interpreted by the shell).
    command: String,

    /// Number of times to execute the command.
    #[arg(short, long, default_value_t = 4)]
    count: u32,

    /// Number of allowed failed runs before giving up, defaults to `--count`.
    #[arg(long)]
    failed_count: Option<u32>,

    /// Sample disk IO, memory and CPU of each run and count network packets.
    #[arg(long)]
    sys_trace: bool,

    /// Trace the system calls of each run.
    #[arg(long)]
    call_trace: bool,

    /// Capture stdout/stderr of each run and print them when it fails.
    #[arg(long)]
    log_trace: bool,

    /// Record network traffic of each run; the capture is kept when it fails.
    #[arg(long)]
    net_trace: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// TOML file overriding the shell, tool commands and artifact directory.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn run_configuration(&self) -> RunConfiguration {
        RunConfiguration::new(
            self.command.clone(),
            self.count,
            self.failed_count,
            TraceFlags {
                sys_trace: self.sys_trace,
                call_trace: self.call_trace,
                log_trace: self.log_trace,
                net_trace: self.net_trace,
            },
        )
    }
}

fn main() {
    let cli = Cli::parse();
    let dispatch = logging::dispatch(cli.debug);
    let code = tracing::dispatcher::with_default(&dispatch, || match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::RUNNER_ERROR
        }
    });
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let settings = match &cli.config {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => load_config(path)?,
        None => RunnerConfig::default(),
    };
    let config = cli.run_configuration();
    let mut out = std::io::stdout().lock();
    execute(&config, &settings, &mut out)
}
