//! Language executors.
//!
//! Supervision stays language-agnostic. Executors define the harness, the
//! interpreter command and the memory signatures for each language.

pub mod adapter;
pub mod languages;
pub mod registry;
