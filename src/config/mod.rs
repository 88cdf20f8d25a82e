//! Configuration and policy
//!
//! Engine configuration, language runtime presets, validation, and the
//! closed type set shared by every module.

pub mod loader;
pub mod presets;
pub mod types;
pub mod validator;
