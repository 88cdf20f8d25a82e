/// Language runtime envelopes
///
/// Each runnable language has an explicit, versioned preset naming the
/// interpreter it runs under, the arguments placed before the harness, the
/// way the memory ceiling is enforced, and the minimal environment the
/// interpreter needs. Presets are data; the executor implementations in
/// `judge::languages` consume them.
use crate::config::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How the memory ceiling is applied to an interpreter process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPolicy {
    /// RLIMIT_AS = ceiling + fixed interpreter overhead (MB)
    AddressSpace { overhead_mb: u64 },
    /// Runtime heap cap flag plus RLIMIT_DATA = ceiling + overhead (MB).
    /// For runtimes that reserve large virtual ranges up front (V8):
    /// RLIMIT_DATA counts only committed writable memory, so buffers
    /// outside the managed heap are bounded too.
    HeapFlag { data_overhead_mb: u64 },
}

/// Runtime preset for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimePreset {
    /// Preset id, recorded in audit events (e.g. "python3-v1")
    pub id: String,
    pub language: Language,
    /// Interpreter executable
    pub interpreter: PathBuf,
    /// Arguments placed before the harness path
    pub args: Vec<String>,
    pub memory_policy: MemoryPolicy,
    /// Environment passed to the interpreter (everything else is cleared)
    pub environment: Vec<(String, String)>,
    /// RLIMIT_NOFILE for the interpreter
    pub fd_limit: u64,
}

/// Preset registry keyed by language
pub struct LanguagePresets {
    presets: HashMap<Language, RuntimePreset>,
}

impl LanguagePresets {
    /// Registry with the default envelopes
    pub fn new() -> Self {
        let mut presets = Self {
            presets: HashMap::new(),
        };
        presets.insert(python3_v1());
        presets.insert(node_v1());
        presets
    }

    pub fn insert(&mut self, preset: RuntimePreset) {
        self.presets.insert(preset.language, preset);
    }

    pub fn get(&self, language: Language) -> Option<&RuntimePreset> {
        self.presets.get(&language)
    }

    /// Override the interpreter path for a language, keeping the rest
    pub fn set_interpreter(&mut self, language: Language, interpreter: PathBuf) {
        if let Some(preset) = self.presets.get_mut(&language) {
            preset.interpreter = interpreter;
        }
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.presets.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}

impl Default for LanguagePresets {
    fn default() -> Self {
        Self::new()
    }
}

fn python3_v1() -> RuntimePreset {
    RuntimePreset {
        id: "python3-v1".to_string(),
        language: Language::Python,
        interpreter: PathBuf::from("/usr/bin/python3"),
        // -I isolated mode (no user site, no PYTHON* env), -S no site import,
        // -B no bytecode writes.
        args: vec!["-I".to_string(), "-S".to_string(), "-B".to_string()],
        memory_policy: MemoryPolicy::AddressSpace { overhead_mb: 64 },
        environment: vec![
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("PYTHONHASHSEED".to_string(), "0".to_string()),
        ],
        fd_limit: 32,
    }
}

fn node_v1() -> RuntimePreset {
    RuntimePreset {
        id: "node-v1".to_string(),
        language: Language::JavaScript,
        interpreter: PathBuf::from("/usr/bin/node"),
        args: vec!["--disallow-code-generation-from-strings".to_string()],
        // node needs about 48 MB of data segment just to start.
        memory_policy: MemoryPolicy::HeapFlag {
            data_overhead_mb: 64,
        },
        environment: Vec::new(),
        fd_limit: 64,
    }
}
