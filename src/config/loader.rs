/// Engine configuration loading from config.json
use crate::config::presets::LanguagePresets;
use crate::config::types::{ExecutionLimits, GradeError, Language, Result};
use crate::config::validator::{MIN_MEMORY_MB, MIN_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full config.json structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Limits used when a question does not carry its own
    pub default_limits: ExecutionLimits,
    /// Upper bound a question may request
    pub max_limits: ExecutionLimits,
    /// Concurrent isolation contexts allowed on this host
    pub max_concurrent_contexts: usize,
    /// Cases of one submission run concurrently (1 = sequential)
    pub case_parallelism: usize,
    /// How long a case waits for a free context slot
    pub slot_acquire_timeout_ms: u64,
    /// Parent directory for run-scoped isolation contexts
    pub workspace_root: PathBuf,
    /// Strict mode: fail the run if a configured control cannot be applied
    pub strict_mode: bool,
    /// Captured stdout cap per run (bytes)
    pub output_limit_bytes: usize,
    /// Captured stderr cap per run (bytes)
    pub stderr_limit_bytes: usize,
    /// Interpreter override for python
    pub python_path: Option<PathBuf>,
    /// Interpreter override for javascript
    pub node_path: Option<PathBuf>,
    /// Delegated cgroup v2 directory; per-run scopes are created beneath it
    pub cgroup_parent: Option<PathBuf>,
    /// Identity the guest drops to when the engine runs as root
    pub sandbox_uid: u32,
    pub sandbox_gid: u32,
    /// Put each run in a private network namespace
    pub isolate_network: bool,
    /// Confine each run's filesystem view to its context directory plus
    /// the interpreter runtime, mounted read-only
    pub isolate_filesystem: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limits: ExecutionLimits::default(),
            max_limits: ExecutionLimits {
                memory_limit_mb: 1024,
                timeout_ms: 30_000,
            },
            max_concurrent_contexts: 4,
            case_parallelism: 1,
            slot_acquire_timeout_ms: 30_000,
            workspace_root: runtime_root_dir(),
            strict_mode: false,
            output_limit_bytes: 1024 * 1024,
            stderr_limit_bytes: 64 * 1024,
            python_path: None,
            node_path: None,
            cgroup_parent: None,
            sandbox_uid: 65534,
            sandbox_gid: 65534,
            isolate_network: true,
            isolate_filesystem: true,
        }
    }
}

/// Runtime root directory scoped by effective UID, so root and non-root
/// engines never share context directories.
pub fn runtime_root_dir() -> PathBuf {
    let euid = nix::unistd::geteuid();
    std::env::temp_dir().join(format!("gradebox-uid-{}", euid.as_raw()))
}

impl EngineConfig {
    /// Load config.json, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GradeError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            GradeError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        crate::config::validator::validate(&config)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        crate::config::validator::validate(&config)?;
        Ok(config)
    }

    /// Apply `GRADEBOX_*` overrides. The lookup is injected so tests do not
    /// have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRADEBOX_TIMEOUT_MS") {
            self.default_limits.timeout_ms = parse_number("GRADEBOX_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("GRADEBOX_MEMORY_MB") {
            self.default_limits.memory_limit_mb = parse_number("GRADEBOX_MEMORY_MB", &v)?;
        }
        if let Some(v) = lookup("GRADEBOX_MAX_CONTEXTS") {
            self.max_concurrent_contexts = parse_number("GRADEBOX_MAX_CONTEXTS", &v)?;
        }
        if let Some(v) = lookup("GRADEBOX_CASE_PARALLELISM") {
            self.case_parallelism = parse_number("GRADEBOX_CASE_PARALLELISM", &v)?;
        }
        if let Some(v) = lookup("GRADEBOX_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("GRADEBOX_STRICT") {
            self.strict_mode = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("GRADEBOX_ISOLATE_FILESYSTEM") {
            self.isolate_filesystem = !matches!(v.as_str(), "0" | "false" | "no");
        }
        if let Some(v) = lookup("GRADEBOX_PYTHON") {
            self.python_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GRADEBOX_NODE") {
            self.node_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GRADEBOX_CGROUP_PARENT") {
            self.cgroup_parent = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Default presets with the configured interpreter overrides applied
    pub fn language_presets(&self) -> LanguagePresets {
        let mut presets = LanguagePresets::new();
        if let Some(path) = &self.python_path {
            presets.set_interpreter(Language::Python, path.clone());
        }
        if let Some(path) = &self.node_path {
            presets.set_interpreter(Language::JavaScript, path.clone());
        }
        presets
    }

    /// Clamp question-supplied limits into [minimum, configured maximum].
    pub fn effective_limits(&self, requested: Option<ExecutionLimits>) -> ExecutionLimits {
        let requested = requested.unwrap_or(self.default_limits);
        ExecutionLimits {
            memory_limit_mb: requested
                .memory_limit_mb
                .min(self.max_limits.memory_limit_mb)
                .max(MIN_MEMORY_MB),
            timeout_ms: requested
                .timeout_ms
                .min(self.max_limits.timeout_ms)
                .max(MIN_TIMEOUT_MS),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| GradeError::Config(format!("{key} must be a number, got '{value}'")))
}
