//! Execution control
//!
//! Pre-exec hardening, process supervision and the per-case runner.

pub mod preexec;
pub mod runner;
pub mod supervisor;
