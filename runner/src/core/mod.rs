//! Deterministic, pure logic shared by the execution loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod compose;
pub mod histogram;
pub mod plan;
pub mod report;
pub mod types;
