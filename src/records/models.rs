/// Question-side data supplied by collaborators
use crate::config::types::ExecutionLimits;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A coding question. Only `limits()` matters to grading; the rest is
/// carried for collaborators and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingQuestion {
    pub id: Uuid,
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub output_format: String,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub test_cases: Vec<CodingTestCase>,
}

impl CodingQuestion {
    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            memory_limit_mb: self.memory_limit_mb,
            timeout_ms: self.time_limit_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingTestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl CodingTestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        CodingTestCase {
            input: input.into(),
            expected_output: expected_output.into(),
            is_sample: false,
            weight: default_weight(),
        }
    }

    pub fn sample(mut self) -> Self {
        self.is_sample = true;
        self
    }

    pub fn weighted(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}
