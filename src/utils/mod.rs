//! Utilities
//!
//! Bounded output collection for guest processes.

pub mod output;
