/// Submission recording
///
/// A submission is built once, redacted before it is stored, and never
/// changed afterwards. Hidden case content never reaches the store, so no
/// later read can reveal it.
use crate::config::types::{Language, Result, SubmissionStatus, HIDDEN_MARKER};
use crate::exec::runner::{CaseResult, RunResult};
use crate::records::models::CodingTestCase;
use crate::records::store::SubmissionStore;
use crate::verdict::grade::GradeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Per-case result as stored and shown to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// 1-based
    pub test_case_number: usize,
    pub is_sample: bool,
    pub passed: bool,
    pub input: String,
    pub expected_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestCaseResult {
    /// Combine a case and its result, withholding hidden content.
    ///
    /// Non-sample cases lose their input, expected output and actual output
    /// whether they passed or not (a passing actual output equals the
    /// expected one). Error text is scrubbed of the hidden values too.
    pub fn redacted(case: &CodingTestCase, result: Option<&CaseResult>, number: usize) -> Self {
        let passed = result.is_some_and(|r| r.passed);
        let execution_time_ms = result.and_then(|r| r.execution_time_ms);
        let error = result.and_then(|r| r.error.clone());

        if case.is_sample {
            return TestCaseResult {
                test_case_number: number,
                is_sample: true,
                passed,
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: result.and_then(|r| r.actual_output.clone()),
                execution_time_ms,
                error,
            };
        }

        TestCaseResult {
            test_case_number: number,
            is_sample: false,
            passed,
            input: HIDDEN_MARKER.to_string(),
            expected_output: HIDDEN_MARKER.to_string(),
            actual_output: None,
            execution_time_ms,
            error: error.map(|message| scrub(&message, case)),
        }
    }
}

fn scrub(message: &str, case: &CodingTestCase) -> String {
    let mut scrubbed = message.to_string();
    for secret in [case.input.trim(), case.expected_output.trim()] {
        if !secret.is_empty() {
            scrubbed = scrubbed.replace(secret, HIDDEN_MARKER);
        }
        for line in secret.lines().map(str::trim).filter(|l| !l.is_empty()) {
            scrubbed = scrubbed.replace(line, HIDDEN_MARKER);
        }
    }
    scrubbed
}

/// Immutable graded submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingSubmission {
    id: Uuid,
    student_id: Uuid,
    question_id: Uuid,
    test_attempt_id: Option<Uuid>,
    code: String,
    code_sha256: String,
    language: Language,
    status: SubmissionStatus,
    test_cases_passed: usize,
    total_test_cases: usize,
    score: u32,
    execution_time_ms: f64,
    test_results: Vec<TestCaseResult>,
    created_at: DateTime<Utc>,
}

impl CodingSubmission {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn student_id(&self) -> Uuid {
        self.student_id
    }

    pub fn question_id(&self) -> Uuid {
        self.question_id
    }

    pub fn test_attempt_id(&self) -> Option<Uuid> {
        self.test_attempt_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn code_sha256(&self) -> &str {
        &self.code_sha256
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    pub fn test_cases_passed(&self) -> usize {
        self.test_cases_passed
    }

    pub fn total_test_cases(&self) -> usize {
        self.total_test_cases
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Mean wall time of the cases that produced output
    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time_ms
    }

    pub fn test_results(&self) -> &[TestCaseResult] {
        &self.test_results
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Who submitted what
#[derive(Debug, Clone, Copy)]
pub struct SubmissionDraft<'a> {
    pub student_id: Uuid,
    pub question_id: Uuid,
    pub test_attempt_id: Option<Uuid>,
    pub code: &'a str,
    pub language: Language,
}

pub fn code_fingerprint(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub struct SubmissionRecorder {
    store: Arc<dyn SubmissionStore>,
}

impl SubmissionRecorder {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        SubmissionRecorder { store }
    }

    /// Build, redact and persist one submission. Every call is a new record;
    /// earlier attempts are kept.
    pub fn record(
        &self,
        draft: SubmissionDraft<'_>,
        run: &RunResult,
        grade: &GradeResult,
        test_cases: &[CodingTestCase],
    ) -> Result<CodingSubmission> {
        let test_results = test_cases
            .iter()
            .enumerate()
            .map(|(index, case)| {
                let result = run.per_case.iter().find(|r| r.index == index);
                TestCaseResult::redacted(case, result, index + 1)
            })
            .collect();

        let submission = CodingSubmission {
            id: Uuid::new_v4(),
            student_id: draft.student_id,
            question_id: draft.question_id,
            test_attempt_id: draft.test_attempt_id,
            code: draft.code.to_string(),
            code_sha256: code_fingerprint(draft.code),
            language: draft.language,
            status: grade.status,
            test_cases_passed: grade.cases_passed,
            total_test_cases: grade.total_cases,
            score: grade.score,
            execution_time_ms: run.avg_time_ms,
            test_results,
            created_at: Utc::now(),
        };

        self.store.insert(submission.clone())?;
        log::debug!(
            "recorded submission {} for student {} question {}",
            submission.id,
            submission.student_id,
            submission.question_id
        );
        Ok(submission)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<CodingSubmission>> {
        self.store.get(id)
    }

    pub fn history(&self, student_id: Uuid, question_id: Uuid) -> Result<Vec<CodingSubmission>> {
        self.store.list_for(student_id, question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::runner::CaseFailure;
    use crate::records::store::InMemorySubmissionStore;
    use crate::verdict::grade::Grader;

    fn result(index: usize, passed: bool, output: &str, error: Option<&str>) -> CaseResult {
        CaseResult {
            index,
            passed,
            actual_output: Some(output.to_string()),
            execution_time_ms: Some(3.0),
            error: error.map(str::to_string),
            failure: error.map(|_| CaseFailure::RuntimeError),
        }
    }

    #[test]
    fn test_hidden_case_redacted_even_when_passed() {
        let case = CodingTestCase::new("secret-in", "secret-out");
        let stored = TestCaseResult::redacted(&case, Some(&result(0, true, "secret-out", None)), 1);
        assert_eq!(stored.input, HIDDEN_MARKER);
        assert_eq!(stored.expected_output, HIDDEN_MARKER);
        assert!(stored.actual_output.is_none());
        assert!(stored.passed);
    }

    #[test]
    fn test_sample_case_never_redacted() {
        let case = CodingTestCase::new("1 2", "3").sample();
        let stored = TestCaseResult::redacted(&case, Some(&result(0, false, "4", None)), 1);
        assert_eq!(stored.input, "1 2");
        assert_eq!(stored.expected_output, "3");
        assert_eq!(stored.actual_output.as_deref(), Some("4"));
    }

    #[test]
    fn test_hidden_values_scrubbed_from_errors() {
        let case = CodingTestCase::new("hunter2", "42");
        let stored = TestCaseResult::redacted(
            &case,
            Some(&result(
                0,
                false,
                "",
                Some("ValueError: invalid literal for int(): 'hunter2'"),
            )),
            1,
        );
        let error = stored.error.unwrap();
        assert!(!error.contains("hunter2"));
        assert!(error.contains(HIDDEN_MARKER));
    }

    #[test]
    fn test_record_is_stored_redacted_with_fingerprint() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let recorder = SubmissionRecorder::new(store.clone());
        let cases = vec![
            CodingTestCase::new("a", "A").sample(),
            CodingTestCase::new("b", "B"),
        ];
        let run = RunResult::from_cases(vec![result(0, true, "A", None), result(1, true, "B", None)]);
        let grade = Grader::grade(&run, &cases);
        let draft = SubmissionDraft {
            student_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            test_attempt_id: None,
            code: "print(input.upper())",
            language: Language::Python,
        };

        let first = recorder.record(draft, &run, &grade, &cases).unwrap();
        let second = recorder.record(draft, &run, &grade, &cases).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.code_sha256(), code_fingerprint("print(input.upper())"));
        assert_eq!(first.code_sha256().len(), 64);

        let fetched = recorder.get(first.id()).unwrap().unwrap();
        assert_eq!(fetched, first);
        assert_eq!(fetched.test_results()[1].input, HIDDEN_MARKER);
        assert_eq!(fetched.test_results()[0].input, "a");

        let history = recorder
            .history(draft.student_id, draft.question_id)
            .unwrap();
        assert_eq!(history.len(), 2);
    }
}
