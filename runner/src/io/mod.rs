//! I/O helpers for the execution loop: processes, attachers, files, config.

pub mod attach;
pub mod call_trace;
pub mod config;
pub mod process;
