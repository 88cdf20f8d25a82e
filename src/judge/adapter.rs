use crate::config::presets::{MemoryPolicy, RuntimePreset};
use crate::config::types::{ExecutionLimits, Language, Result};
use crate::sandbox::context::IsolationContext;
use std::path::PathBuf;

/// Line prefix a harness writes to stderr when the guest raised
pub const ERROR_MARKER: &str = "__GRADEBOX_ERROR__:";

/// Exit code a harness uses for guest memory exhaustion
pub const MEMORY_EXIT_CODE: i32 = 3;

/// Longest runtime error message surfaced to callers
const MAX_ERROR_LEN: usize = 512;

/// How to start one prepared guest run
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub environment: Vec<(String, String)>,
    /// RLIMIT_AS for the interpreter, if its memory policy uses one
    pub address_space_bytes: Option<u64>,
    /// RLIMIT_DATA for the interpreter, if its memory policy uses one
    pub data_segment_bytes: Option<u64>,
}

/// One guest run as an executor sees it
#[derive(Debug, Clone, Copy)]
pub struct GuestRun<'a> {
    pub code: &'a str,
    pub limits: ExecutionLimits,
    /// Captured stdout cap, for harnesses that buffer output in-process
    pub output_limit_bytes: usize,
}

/// Per-language execution strategy.
///
/// An executor writes its harness and the guest source into a fresh context
/// and says how to start the interpreter. Supervision and classification
/// stay language-agnostic in `sandbox`.
pub trait LanguageExecutor: Send + Sync {
    fn language(&self) -> Language;

    fn preset(&self) -> &RuntimePreset;

    fn prepare(&self, context: &IsolationContext, run: &GuestRun<'_>) -> Result<LaunchPlan>;

    /// Runtime-specific memory exhaustion signature
    fn memory_exhausted(&self, exit_code: Option<i32>, _stderr: &str) -> bool {
        exit_code == Some(MEMORY_EXIT_CODE)
    }
}

/// RLIMIT_AS implied by a preset's memory policy
pub fn address_space_limit(preset: &RuntimePreset, limits: &ExecutionLimits) -> Option<u64> {
    match preset.memory_policy {
        MemoryPolicy::AddressSpace { overhead_mb } => {
            Some((limits.memory_limit_mb + overhead_mb) * 1024 * 1024)
        }
        MemoryPolicy::HeapFlag { .. } => None,
    }
}

/// RLIMIT_DATA implied by a preset's memory policy
pub fn data_segment_limit(preset: &RuntimePreset, limits: &ExecutionLimits) -> Option<u64> {
    match preset.memory_policy {
        MemoryPolicy::HeapFlag { data_overhead_mb } => {
            Some((limits.memory_limit_mb + data_overhead_mb) * 1024 * 1024)
        }
        MemoryPolicy::AddressSpace { .. } => None,
    }
}

/// Message from the harness error marker, if the guest raised.
/// Only the marker line is used, so stack traces never leave the sandbox.
pub fn runtime_error_message(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(ERROR_MARKER))
        .map(|message| {
            let message = message.trim();
            if message.len() <= MAX_ERROR_LEN {
                return message.to_string();
            }
            let mut end = MAX_ERROR_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &message[..end])
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LanguagePresets;

    #[test]
    fn test_marker_extraction_ignores_traceback() {
        let stderr = "Traceback (most recent call last):\n  File \"x\", line 1\n\
                      __GRADEBOX_ERROR__:ZeroDivisionError: division by zero\n";
        assert_eq!(
            runtime_error_message(stderr).as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
        assert_eq!(runtime_error_message("plain noise\n"), None);
    }

    #[test]
    fn test_long_messages_are_cut() {
        let stderr = format!("{}Error: {}", ERROR_MARKER, "é".repeat(600));
        let message = runtime_error_message(&stderr).unwrap();
        assert!(message.ends_with("..."));
        assert!(message.len() <= MAX_ERROR_LEN + 3);
    }

    #[test]
    fn test_address_space_policy() {
        let presets = LanguagePresets::new();
        let limits = ExecutionLimits::default();
        let python = presets.get(Language::Python).unwrap();
        assert_eq!(
            address_space_limit(python, &limits),
            Some((128 + 64) * 1024 * 1024)
        );
        assert_eq!(data_segment_limit(python, &limits), None);
        let node = presets.get(Language::JavaScript).unwrap();
        assert_eq!(address_space_limit(node, &limits), None);
        assert_eq!(
            data_segment_limit(node, &limits),
            Some((128 + 64) * 1024 * 1024)
        );
    }

    #[test]
    fn test_every_preset_has_a_memory_ceiling() {
        let presets = LanguagePresets::new();
        let limits = ExecutionLimits::default();
        for language in presets.languages() {
            let preset = presets.get(language).unwrap();
            assert!(
                address_space_limit(preset, &limits).is_some()
                    || data_segment_limit(preset, &limits).is_some(),
                "{} has no kernel memory ceiling",
                preset.id
            );
        }
    }
}
