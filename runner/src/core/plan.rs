//! Capability negotiation: which diagnostic processes an iteration needs.
//!
//! The four CLI flags overlap (sys-trace and net-trace both need a packet
//! capture), so the set of processes to spawn is derived here once instead of
//! per flag.

use crate::core::types::TraceFlags;

/// Console panel sections, declared in print order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    DiskIo,
    Memory,
    Cpu,
    NetworkCounters,
    SystemCalls,
    Stdout,
    Stderr,
}

impl Section {
    pub fn header(self) -> &'static str {
        match self {
            Section::DiskIo => "Disk IO:",
            Section::Memory => "Memory:",
            Section::Cpu => "CPU usage:",
            Section::NetworkCounters => "Network package counters:",
            Section::SystemCalls => "printing system calls:",
            Section::Stdout => "stdout:",
            Section::Stderr => "stderr:",
        }
    }
}

/// Resource samplers keyed to the child's process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    Disk,
    Memory,
    Cpu,
}

impl Sampler {
    pub const ALL: [Sampler; 3] = [Sampler::Disk, Sampler::Memory, Sampler::Cpu];

    pub fn name(self) -> &'static str {
        match self {
            Sampler::Disk => "disk",
            Sampler::Memory => "memory",
            Sampler::Cpu => "cpu",
        }
    }

    pub fn section(self) -> Section {
        match self {
            Sampler::Disk => Section::DiskIo,
            Sampler::Memory => Section::Memory,
            Sampler::Cpu => Section::Cpu,
        }
    }
}

/// What the shared packet-capture process does with its capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Only the packet counters matter; the capture file is scratch.
    Counters,
    /// The capture file is a per-iteration artifact kept on failure.
    Persist,
}

/// Diagnostic processes and panels for every iteration of a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPlan {
    pub samplers: Vec<Sampler>,
    pub capture: Option<CaptureMode>,
    /// Print the capture's packet counters in the sys-trace panel.
    pub print_counters: bool,
    pub call_trace: bool,
    pub log_trace: bool,
}

impl AttachPlan {
    pub fn from_flags(flags: &TraceFlags) -> Self {
        let samplers = if flags.sys_trace {
            Sampler::ALL.to_vec()
        } else {
            Vec::new()
        };
        let capture = match (flags.net_trace, flags.sys_trace) {
            (true, _) => Some(CaptureMode::Persist),
            (false, true) => Some(CaptureMode::Counters),
            (false, false) => None,
        };
        Self {
            samplers,
            capture,
            print_counters: flags.sys_trace,
            call_trace: flags.call_trace,
            log_trace: flags.log_trace,
        }
    }

    /// True if a section's captured text belongs in the failure panel.
    pub fn prints(&self, section: Section) -> bool {
        match section {
            Section::DiskIo => self.samplers.contains(&Sampler::Disk),
            Section::Memory => self.samplers.contains(&Sampler::Memory),
            Section::Cpu => self.samplers.contains(&Sampler::Cpu),
            Section::NetworkCounters => self.print_counters && self.capture.is_some(),
            Section::SystemCalls => self.call_trace,
            Section::Stdout | Section::Stderr => self.log_trace,
        }
    }
}
