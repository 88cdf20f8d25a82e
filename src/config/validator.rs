/// Config validation
///
/// Rejects configurations the sandbox cannot honor before any run starts.
use crate::config::loader::EngineConfig;
use crate::config::types::{ExecutionLimits, GradeError, Result};

/// Smallest memory ceiling an interpreter can start under
pub const MIN_MEMORY_MB: u64 = 16;

/// Smallest meaningful wall-clock timeout
pub const MIN_TIMEOUT_MS: u64 = 50;

pub fn validate(config: &EngineConfig) -> Result<()> {
    validate_limits("default_limits", &config.default_limits)?;
    validate_limits("max_limits", &config.max_limits)?;

    if config.default_limits.memory_limit_mb > config.max_limits.memory_limit_mb
        || config.default_limits.timeout_ms > config.max_limits.timeout_ms
    {
        return Err(GradeError::Config(
            "default_limits must not exceed max_limits".to_string(),
        ));
    }

    if config.max_concurrent_contexts == 0 {
        return Err(GradeError::Config(
            "max_concurrent_contexts must be at least 1".to_string(),
        ));
    }

    if config.case_parallelism == 0 {
        return Err(GradeError::Config(
            "case_parallelism must be at least 1".to_string(),
        ));
    }

    if config.output_limit_bytes == 0 {
        return Err(GradeError::Config(
            "output_limit_bytes must be positive".to_string(),
        ));
    }

    if !config.workspace_root.is_absolute() {
        return Err(GradeError::Config(format!(
            "workspace_root must be absolute: {}",
            config.workspace_root.display()
        )));
    }

    if config.sandbox_uid == 0 || config.sandbox_gid == 0 {
        return Err(GradeError::Config(
            "sandbox identity must not be root".to_string(),
        ));
    }

    if config.case_parallelism > config.max_concurrent_contexts {
        log::warn!(
            "case_parallelism {} exceeds max_concurrent_contexts {}; cases will queue for slots",
            config.case_parallelism,
            config.max_concurrent_contexts
        );
    }

    Ok(())
}

fn validate_limits(name: &str, limits: &ExecutionLimits) -> Result<()> {
    if limits.memory_limit_mb < MIN_MEMORY_MB {
        return Err(GradeError::Config(format!(
            "{name}.memory_limit_mb must be at least {MIN_MEMORY_MB}"
        )));
    }
    if limits.timeout_ms < MIN_TIMEOUT_MS {
        return Err(GradeError::Config(format!(
            "{name}.timeout_ms must be at least {MIN_TIMEOUT_MS}"
        )));
    }
    Ok(())
}
