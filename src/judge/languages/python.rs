use crate::config::presets::RuntimePreset;
use crate::config::types::{Language, Result};
use crate::judge::adapter::{
    address_space_limit, data_segment_limit, GuestRun, LanguageExecutor, LaunchPlan,
};
use crate::sandbox::context::IsolationContext;

const HARNESS: &str = include_str!("harness/python_harness.py");

#[derive(Debug, Clone)]
pub struct PythonExecutor {
    preset: RuntimePreset,
}

impl PythonExecutor {
    pub fn new(preset: RuntimePreset) -> Self {
        PythonExecutor { preset }
    }
}

impl LanguageExecutor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn preset(&self) -> &RuntimePreset {
        &self.preset
    }

    fn prepare(&self, context: &IsolationContext, run: &GuestRun<'_>) -> Result<LaunchPlan> {
        context.write_file("solution.py", run.code)?;
        context.write_file("harness.py", HARNESS)?;

        // Relative to the context directory, which is the guest's cwd
        // whether or not it is also the guest's root.
        let mut args = self.preset.args.clone();
        args.push("harness.py".to_string());

        Ok(LaunchPlan {
            program: self.preset.interpreter.clone(),
            args,
            environment: self.preset.environment.clone(),
            address_space_bytes: address_space_limit(&self.preset, &run.limits),
            data_segment_bytes: data_segment_limit(&self.preset, &run.limits),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LanguagePresets;
    use crate::config::types::ExecutionLimits;

    #[test]
    fn test_prepare_writes_harness_and_source() {
        let preset = LanguagePresets::new().get(Language::Python).unwrap().clone();
        let executor = PythonExecutor::new(preset);
        let root = std::env::temp_dir().join(format!("gradebox-py-{}", uuid::Uuid::new_v4()));
        let context = IsolationContext::create(&root, None, false).unwrap();

        let run = GuestRun {
            code: "def solution():\n    return 42\n",
            limits: ExecutionLimits::default(),
            output_limit_bytes: 1024,
        };
        let plan = executor.prepare(&context, &run).unwrap();

        assert_eq!(plan.args[..3], ["-I", "-S", "-B"]);
        assert_eq!(plan.args[3], "harness.py");
        assert!(context.root().join("solution.py").exists());
        assert!(plan.address_space_bytes.is_some());
        assert!(plan.data_segment_bytes.is_none());
        drop(context);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_memory_signature_is_exit_code() {
        let preset = LanguagePresets::new().get(Language::Python).unwrap().clone();
        let executor = PythonExecutor::new(preset);
        assert!(executor.memory_exhausted(Some(3), ""));
        assert!(!executor.memory_exhausted(Some(1), "MemoryError"));
    }
}
