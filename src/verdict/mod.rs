//! Grading: weighted score and submission status derived as pure functions
//! of a run result.

pub mod grade;
