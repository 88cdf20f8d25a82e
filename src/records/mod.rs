//! Records: question data, immutable submissions and practice progress.

pub mod models;
pub mod progress;
pub mod store;
pub mod submission;
