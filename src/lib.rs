//! gradebox: sandboxed execution and grading of coding-question submissions
//!
//! Untrusted Python and JavaScript run in an interpreter subprocess, one fresh
//! isolation context per test case, under kernel-enforced limits. Outputs are
//! compared with the expected ones, graded into a weighted score and status,
//! and recorded as an immutable submission with hidden cases redacted.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::cgroup`]: cgroup v2 run scopes (memory, pids, OOM accounting)
//! - [`kernel::signal`]: Process-group kill and sweep
//! - [`kernel::namespace`]: Private net/IPC/PID/mount namespaces and the PID 1 relay
//! - [`kernel::mount`]: Read-only filesystem jail rooted at the context directory
//!
//! ## Execution Control ([`exec`])
//! - [`exec::preexec`]: Allocation-free hardening applied in the child before exec
//! - [`exec::supervisor`]: Spawn, feed stdin, bound output, enforce wall time
//! - [`exec::runner`]: Per-case orchestration, sequential or parallel
//!
//! ## Sandbox ([`sandbox`])
//! - [`sandbox::context`]: Disposable per-run directories and cgroup scopes
//! - [`sandbox::pool`]: Bounded slots for concurrent contexts
//!
//! ## Languages ([`judge`])
//! - [`judge::adapter`]: Language executor seam and error-marker protocol
//! - [`judge::languages`]: Python and JavaScript harnesses
//! - [`judge::registry`]: Interpreter discovery
//!
//! ## Grading & Records
//! - [`verdict::grade`]: Weighted score and submission status
//! - [`records`]: Questions, submissions, practice progress, stores
//! - [`engine`]: The grading facade
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: config.json plus `GRADEBOX_*` overrides
//! - [`config::validator`]: Config checks before anything runs
//! - [`config::types`]: Shared type definitions and closed enums
//! - [`config::presets`]: Versioned language runtime envelopes

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Isolation contexts and the process sandbox
pub mod sandbox;

// Language executors
pub mod judge;

// Grading
pub mod verdict;

// Submissions and progress
pub mod records;

// Facade
pub mod engine;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the gradebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
