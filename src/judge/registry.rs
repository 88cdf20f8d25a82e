use crate::config::presets::{LanguagePresets, RuntimePreset};
use crate::config::types::{ExecutionError, Language};
use crate::judge::adapter::LanguageExecutor;
use crate::judge::languages::{javascript::JavaScriptExecutor, python::PythonExecutor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Language -> executor map. A language with no entry is not runnable here.
pub struct ExecutorRegistry {
    executors: HashMap<Language, Box<dyn LanguageExecutor>>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        ExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Build executors for every preset whose interpreter can be found.
    pub fn from_presets(presets: &LanguagePresets) -> Self {
        let mut registry = Self::empty();
        for language in presets.languages() {
            let Some(preset) = presets.get(language) else {
                continue;
            };
            let Some(interpreter) = resolve_interpreter(&preset.interpreter) else {
                log::warn!(
                    "{} interpreter {} not found; {} submissions will be rejected",
                    language,
                    preset.interpreter.display(),
                    language
                );
                continue;
            };
            let preset = RuntimePreset {
                interpreter,
                ..preset.clone()
            };
            match language {
                Language::Python => registry.register(Box::new(PythonExecutor::new(preset))),
                Language::JavaScript => {
                    registry.register(Box::new(JavaScriptExecutor::new(preset)))
                }
                other => log::warn!("no executor implementation for {}", other),
            }
        }
        registry
    }

    pub fn register(&mut self, executor: Box<dyn LanguageExecutor>) {
        self.executors.insert(executor.language(), executor);
    }

    pub fn get(
        &self,
        language: Language,
    ) -> std::result::Result<&dyn LanguageExecutor, ExecutionError> {
        self.executors
            .get(&language)
            .map(|executor| executor.as_ref())
            .ok_or(ExecutionError::LanguageUnavailable(language))
    }

    pub fn available(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.executors.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}

/// The configured path if it exists, otherwise the same file name on PATH.
pub fn resolve_interpreter(configured: &Path) -> Option<PathBuf> {
    if configured.is_file() {
        return Some(configured.to_path_buf());
    }
    let name = configured.file_name()?;
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_languages_are_unavailable() {
        let registry = ExecutorRegistry::from_presets(&LanguagePresets::new());
        for language in [Language::Java, Language::Cpp, Language::C] {
            assert_eq!(
                registry.get(language).err(),
                Some(ExecutionError::LanguageUnavailable(language))
            );
        }
    }

    #[test]
    fn test_missing_interpreter_is_unavailable() {
        let mut presets = LanguagePresets::new();
        presets.set_interpreter(
            Language::Python,
            PathBuf::from("/nonexistent/gradebox-no-such-python"),
        );
        let registry = ExecutorRegistry::from_presets(&presets);
        assert!(!registry.available().contains(&Language::Python));
        assert!(registry.get(Language::Python).is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_path() {
        // `sh` is on PATH everywhere tests run; the configured dir is bogus.
        let resolved = resolve_interpreter(Path::new("/nonexistent/bin/sh"));
        assert!(resolved.is_some_and(|p| p.ends_with("sh")));
    }
}
