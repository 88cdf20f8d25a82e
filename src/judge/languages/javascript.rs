use crate::config::presets::RuntimePreset;
use crate::config::types::{Language, Result};
use crate::judge::adapter::{
    address_space_limit, data_segment_limit, GuestRun, LanguageExecutor, LaunchPlan,
    MEMORY_EXIT_CODE,
};
use crate::sandbox::context::IsolationContext;

const HARNESS: &str = include_str!("harness/javascript_harness.js");

/// stderr text V8 prints when the heap cap or the data segment is hit
const HEAP_EXHAUSTED: [&str; 3] = [
    "JavaScript heap out of memory",
    "Reached heap limit",
    "Array buffer allocation failed",
];

#[derive(Debug, Clone)]
pub struct JavaScriptExecutor {
    preset: RuntimePreset,
}

impl JavaScriptExecutor {
    pub fn new(preset: RuntimePreset) -> Self {
        JavaScriptExecutor { preset }
    }
}

impl LanguageExecutor for JavaScriptExecutor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn preset(&self) -> &RuntimePreset {
        &self.preset
    }

    fn prepare(&self, context: &IsolationContext, run: &GuestRun<'_>) -> Result<LaunchPlan> {
        context.write_file("solution.js", run.code)?;
        context.write_file("harness.js", HARNESS)?;

        let mut args = self.preset.args.clone();
        args.push(format!("--max-old-space-size={}", run.limits.memory_limit_mb));
        args.push("harness.js".to_string());
        args.push(run.output_limit_bytes.to_string());

        Ok(LaunchPlan {
            program: self.preset.interpreter.clone(),
            args,
            environment: self.preset.environment.clone(),
            address_space_bytes: address_space_limit(&self.preset, &run.limits),
            data_segment_bytes: data_segment_limit(&self.preset, &run.limits),
        })
    }

    fn memory_exhausted(&self, exit_code: Option<i32>, stderr: &str) -> bool {
        exit_code == Some(MEMORY_EXIT_CODE)
            || HEAP_EXHAUSTED.iter().any(|signature| stderr.contains(signature))
    }
}
