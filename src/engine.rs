/// Grading facade: run, grade, record and (for practice) track progress.
use crate::config::loader::EngineConfig;
use crate::config::types::{ExecutionLimits, GradeError, Language, Result, SubmissionStatus};
use crate::exec::runner::{CaseFailure, RunResult, TestCaseRunner};
use crate::observability::audit::{self, AuditEvent, AuditEventType, RunCorrelation};
use crate::records::models::CodingTestCase;
use crate::records::progress::{PracticeCodingProgress, ProgressTracker};
use crate::records::store::{
    InMemoryProgressStore, InMemorySubmissionStore, ProgressStore, SubmissionStore,
};
use crate::records::submission::{
    CodingSubmission, SubmissionDraft, SubmissionRecorder, TestCaseResult,
};
use crate::sandbox::context::sweep_stale_contexts;
use crate::sandbox::pool::SlotPool;
use crate::sandbox::{CodeExecutor, Sandbox};
use crate::verdict::grade::Grader;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Contexts older than this are leftovers from a crashed engine
const STALE_CONTEXT_AGE: Duration = Duration::from_secs(3600);

/// One grading run as supplied by collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingRequest {
    pub question_id: Uuid,
    pub student_id: Uuid,
    pub code: String,
    pub language: Language,
    pub test_cases: Vec<CodingTestCase>,
    #[serde(default)]
    pub test_attempt_id: Option<Uuid>,
    #[serde(default)]
    pub is_practice: bool,
    /// Question limits; engine defaults when absent
    #[serde(default)]
    pub limits: Option<ExecutionLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultView {
    pub test_case_number: usize,
    pub passed: bool,
    pub input: String,
    pub expected_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    /// Wall time in ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TestCaseResult> for TestResultView {
    fn from(result: &TestCaseResult) -> Self {
        TestResultView {
            test_case_number: result.test_case_number,
            passed: result.passed,
            input: result.input.clone(),
            expected_output: result.expected_output.clone(),
            actual_output: result.actual_output.clone(),
            execution_time: result.execution_time_ms,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub test_cases_passed: usize,
    pub total_test_cases: usize,
    pub score: u32,
    pub test_results: Vec<TestResultView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<PracticeCodingProgress>,
}

impl GradingResponse {
    /// Built from the stored (already redacted) record only
    pub fn from_submission(
        submission: &CodingSubmission,
        progress: Option<PracticeCodingProgress>,
    ) -> Self {
        GradingResponse {
            submission_id: submission.id(),
            status: submission.status(),
            test_cases_passed: submission.test_cases_passed(),
            total_test_cases: submission.total_test_cases(),
            score: submission.score(),
            test_results: submission.test_results().iter().map(Into::into).collect(),
            progress,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    executor: Arc<dyn CodeExecutor>,
    runner: TestCaseRunner,
    recorder: SubmissionRecorder,
    progress: ProgressTracker,
}

impl Engine {
    /// Engine over the process sandbox and in-memory stores
    pub fn new(config: EngineConfig) -> Result<Self> {
        sweep_stale_contexts(&config.workspace_root, STALE_CONTEXT_AGE);
        let sandbox: Arc<dyn CodeExecutor> = Arc::new(Sandbox::new(&config));
        Self::with_parts(
            config,
            sandbox,
            Arc::new(InMemorySubmissionStore::new()),
            Arc::new(InMemoryProgressStore::new()),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        executor: Arc<dyn CodeExecutor>,
        submissions: Arc<dyn SubmissionStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Result<Self> {
        let pool = SlotPool::new(config.max_concurrent_contexts)?;
        let runner = TestCaseRunner::new(
            executor.clone(),
            pool,
            config.case_parallelism,
            Duration::from_millis(config.slot_acquire_timeout_ms),
        );
        Ok(Engine {
            config,
            executor,
            runner,
            recorder: SubmissionRecorder::new(submissions),
            progress: ProgressTracker::new(progress),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn available_languages(&self) -> Vec<Language> {
        self.executor.available_languages()
    }

    /// Full grading run for one submission.
    pub fn grade_submission(&self, request: &GradingRequest) -> Result<GradingResponse> {
        let correlation = RunCorrelation::new(request.student_id, request.question_id);
        let limits = self.config.effective_limits(request.limits);
        audit::emit(
            AuditEvent::new(
                AuditEventType::GradingStarted,
                format!(
                    "{} cases, {} ms / {} MB",
                    request.test_cases.len(),
                    limits.timeout_ms,
                    limits.memory_limit_mb
                ),
            )
            .with_correlation(correlation)
            .with_language(request.language),
        );

        let run = match self.run(request, &limits) {
            Ok(run) => run,
            Err(e) => {
                audit::emit(
                    AuditEvent::new(AuditEventType::RunAborted, e.to_string())
                        .with_correlation(correlation)
                        .with_language(request.language),
                );
                return Err(e);
            }
        };
        audit_case_failures(&run, correlation);

        let grade = Grader::grade(&run, &request.test_cases);
        let submission = self.recorder.record(
            SubmissionDraft {
                student_id: request.student_id,
                question_id: request.question_id,
                test_attempt_id: request.test_attempt_id,
                code: &request.code,
                language: request.language,
            },
            &run,
            &grade,
            &request.test_cases,
        )?;
        audit::emit(
            AuditEvent::new(AuditEventType::SubmissionRecorded, "submission recorded")
                .with_correlation(correlation)
                .with_language(request.language)
                .with_outcome(submission.id(), grade.status, grade.score),
        );

        let progress = if request.is_practice {
            let row =
                self.progress
                    .upsert_progress(request.student_id, request.question_id, &grade)?;
            audit::emit(
                AuditEvent::new(
                    AuditEventType::ProgressUpdated,
                    format!("attempts={} best_score={}", row.attempts, row.best_score),
                )
                .with_correlation(correlation),
            );
            Some(row)
        } else {
            None
        };

        Ok(GradingResponse::from_submission(&submission, progress))
    }

    fn run(&self, request: &GradingRequest, limits: &ExecutionLimits) -> Result<RunResult> {
        if request.test_cases.is_empty() {
            return Err(GradeError::Config(
                "a question with zero test cases cannot be run".to_string(),
            ));
        }
        if !self.executor.available_languages().contains(&request.language) {
            return Err(GradeError::LanguageUnavailable(request.language));
        }
        self.runner
            .run(&request.code, request.language, &request.test_cases, limits)
    }

    /// Re-serve a stored submission. Hidden content was dropped before
    /// storage, so this can never reveal it.
    pub fn submission_view(&self, id: Uuid) -> Result<Option<GradingResponse>> {
        Ok(self
            .recorder
            .get(id)?
            .map(|submission| GradingResponse::from_submission(&submission, None)))
    }

    pub fn submission_history(
        &self,
        student_id: Uuid,
        question_id: Uuid,
    ) -> Result<Vec<CodingSubmission>> {
        self.recorder.history(student_id, question_id)
    }

    pub fn practice_progress(
        &self,
        student_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<PracticeCodingProgress>> {
        self.progress.get(student_id, question_id)
    }
}

fn audit_case_failures(run: &RunResult, correlation: RunCorrelation) {
    for case in &run.per_case {
        let Some(failure) = case.failure else {
            continue;
        };
        let event = match failure {
            CaseFailure::LimitExceeded(limit) => {
                AuditEvent::new(AuditEventType::CaseLimitViolation, limit.to_string())
                    .with_limit(limit)
            }
            // Guest messages can quote hidden input; they stay out of the log.
            CaseFailure::RuntimeError => {
                AuditEvent::new(AuditEventType::CaseRuntimeError, "uncaught guest error")
            }
        };
        audit::emit(event.with_correlation(correlation).with_case(case.index + 1));
    }
}
