//! Observability
//!
//! Structured audit events for grading runs.

pub mod audit;
