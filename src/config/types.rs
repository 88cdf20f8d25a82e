/// Core types shared across the gradebox engine
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default per-run memory ceiling (MB)
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;

/// Default per-run wall-clock timeout (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Marker that replaces the content of non-sample test cases in every
/// externally visible result.
pub const HIDDEN_MARKER: &str = "[Hidden]";

/// Submission language - closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "js", alias = "node")]
    JavaScript,
    #[serde(alias = "py", alias = "python3")]
    Python,
    Java,
    #[serde(alias = "c++")]
    Cpp,
    C,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::C,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" | "nodejs" => Ok(Language::JavaScript),
            "python" | "py" | "python3" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "cpp" | "c++" | "cxx" | "cc" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            other => Err(GradeError::Config(format!("unknown language: {other}"))),
        }
    }
}

/// Per-run resource envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Hard memory ceiling in MB
    pub memory_limit_mb: u64,
    /// Wall-clock timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ExecutionLimits {
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb * 1024 * 1024
    }
}

/// Which resource envelope a run broke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimit {
    WallTime,
    CpuTime,
    Memory,
    Output,
}

impl ResourceLimit {
    /// Time-based violations feed `time_limit_exceeded`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResourceLimit::WallTime | ResourceLimit::CpuTime)
    }
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimit::WallTime => write!(f, "wall time limit exceeded"),
            ResourceLimit::CpuTime => write!(f, "cpu time limit exceeded"),
            ResourceLimit::Memory => write!(f, "memory limit exceeded"),
            ResourceLimit::Output => write!(f, "output limit exceeded"),
        }
    }
}

/// Outcome of one sandboxed run that did not produce output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(ResourceLimit),

    #[error("{0}")]
    Runtime(String),

    #[error("language not runnable in this environment: {0}")]
    LanguageUnavailable(Language),

    #[error("sandbox infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ExecutionError {
    /// Errors that end the whole submission instead of a single case.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::LanguageUnavailable(_) | ExecutionError::Infrastructure(_)
        )
    }
}

/// Submission status - closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::WrongAnswer => "wrong_answer",
            SubmissionStatus::RuntimeError => "runtime_error",
            SubmissionStatus::TimeLimitExceeded => "time_limit_exceeded",
        };
        f.write_str(s)
    }
}

/// Custom error types for gradebox
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Language not runnable in this environment: {0}")]
    LanguageUnavailable(Language),

    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ExecutionError> for GradeError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::LanguageUnavailable(language) => GradeError::LanguageUnavailable(language),
            ExecutionError::Infrastructure(msg) => GradeError::Infrastructure(msg),
            other => GradeError::Infrastructure(format!("unexpected per-case error: {other}")),
        }
    }
}

impl From<nix::errno::Errno> for GradeError {
    fn from(err: nix::errno::Errno) -> Self {
        GradeError::Infrastructure(err.to_string())
    }
}

/// Result type alias for gradebox operations
pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases() {
        assert_eq!("JS".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serde_roundtrip_names() {
        let lang: Language = serde_json::from_str("\"node\"").unwrap();
        assert_eq!(lang, Language::JavaScript);
        assert_eq!(serde_json::to_string(&Language::Python).unwrap(), "\"python\"");
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SubmissionStatus::TimeLimitExceeded).unwrap(),
            "\"time_limit_exceeded\""
        );
        assert_eq!(SubmissionStatus::WrongAnswer.to_string(), "wrong_answer");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ExecutionError::LanguageUnavailable(Language::Java).is_fatal());
        assert!(ExecutionError::Infrastructure("x".into()).is_fatal());
        assert!(!ExecutionError::Runtime("boom".into()).is_fatal());
        assert!(!ExecutionError::ResourceLimitExceeded(ResourceLimit::WallTime).is_fatal());
    }

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.memory_limit_mb, 128);
        assert_eq!(limits.timeout_ms, 5000);
        assert_eq!(limits.memory_limit_bytes(), 128 * 1024 * 1024);
    }
}
