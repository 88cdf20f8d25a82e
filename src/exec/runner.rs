/// Test case runner
///
/// Drives the sandbox once per test case. Every case gets its own slot and
/// its own isolation context; per-case failures are recorded and never stop
/// the remaining cases. Only fatal errors (language unavailable, broken
/// infrastructure) abort the run.
use crate::config::types::{ExecutionError, ExecutionLimits, GradeError, Language, ResourceLimit, Result};
use crate::records::models::CodingTestCase;
use crate::sandbox::pool::SlotPool;
use crate::sandbox::CodeExecutor;
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Why a case failed without producing comparable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFailure {
    RuntimeError,
    LimitExceeded(ResourceLimit),
}

impl CaseFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CaseFailure::LimitExceeded(limit) if limit.is_timeout())
    }
}

/// Outcome of one test case, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// 0-based position in the submitted case list
    pub index: usize,
    pub passed: bool,
    pub actual_output: Option<String>,
    pub execution_time_ms: Option<f64>,
    pub error: Option<String>,
    pub failure: Option<CaseFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub per_case: Vec<CaseResult>,
    pub had_runtime_error: bool,
    pub had_timeout: bool,
    /// Mean wall time of the cases that produced output; 0 if none did
    pub avg_time_ms: f64,
}

impl RunResult {
    pub fn from_cases(per_case: Vec<CaseResult>) -> Self {
        let had_timeout = per_case
            .iter()
            .any(|case| case.failure.is_some_and(|f| f.is_timeout()));
        // Memory and output violations also count here; only the time
        // limits map to time_limit_exceeded.
        let had_runtime_error = per_case
            .iter()
            .any(|case| case.failure.is_some_and(|f| !f.is_timeout()));

        let timings: Vec<f64> = per_case
            .iter()
            .filter(|case| case.failure.is_none())
            .filter_map(|case| case.execution_time_ms)
            .collect();
        let avg_time_ms = if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<f64>() / timings.len() as f64
        };

        RunResult {
            per_case,
            had_runtime_error,
            had_timeout,
            avg_time_ms,
        }
    }

    pub fn cases_passed(&self) -> usize {
        self.per_case.iter().filter(|case| case.passed).count()
    }
}

/// Exact comparison after trimming surrounding whitespace
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

pub struct TestCaseRunner {
    executor: Arc<dyn CodeExecutor>,
    pool: SlotPool,
    parallelism: usize,
    slot_timeout: Duration,
}

impl TestCaseRunner {
    pub fn new(
        executor: Arc<dyn CodeExecutor>,
        pool: SlotPool,
        parallelism: usize,
        slot_timeout: Duration,
    ) -> Self {
        TestCaseRunner {
            executor,
            pool,
            parallelism: parallelism.max(1),
            slot_timeout,
        }
    }

    /// Run every case and collect the results in input order.
    pub fn run(
        &self,
        code: &str,
        language: Language,
        test_cases: &[CodingTestCase],
        limits: &ExecutionLimits,
    ) -> Result<RunResult> {
        if test_cases.is_empty() {
            return Err(GradeError::Config(
                "a question with zero test cases cannot be run".to_string(),
            ));
        }

        let per_case = if self.parallelism == 1 || test_cases.len() == 1 {
            test_cases
                .iter()
                .enumerate()
                .map(|(index, case)| self.run_case(index, code, language, case, limits))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.run_parallel(code, language, test_cases, limits)?
        };

        let result = RunResult::from_cases(per_case);
        log::info!(
            "{} run: {}/{} passed, runtime_error={}, timeout={}, avg {:.1} ms",
            language,
            result.cases_passed(),
            test_cases.len(),
            result.had_runtime_error,
            result.had_timeout,
            result.avg_time_ms
        );
        Ok(result)
    }

    fn run_parallel(
        &self,
        code: &str,
        language: Language,
        test_cases: &[CodingTestCase],
        limits: &ExecutionLimits,
    ) -> Result<Vec<CaseResult>> {
        let (job_tx, job_rx) = unbounded::<usize>();
        for index in 0..test_cases.len() {
            // The receiver is alive in this scope, so send cannot fail.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded::<(usize, Result<CaseResult>)>();
        let aborted = AtomicBool::new(false);
        let workers = self.parallelism.min(test_cases.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let aborted = &aborted;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        if aborted.load(Ordering::SeqCst) {
                            break;
                        }
                        let result =
                            self.run_case(index, code, language, &test_cases[index], limits);
                        if result.is_err() {
                            aborted.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<CaseResult>> = vec![None; test_cases.len()];
        let mut first_error: Option<(usize, GradeError)> = None;
        for (index, result) in result_rx.try_iter() {
            match result {
                Ok(case) => slots[index] = Some(case),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| GradeError::Infrastructure("case results incomplete".to_string()))
    }

    fn run_case(
        &self,
        index: usize,
        code: &str,
        language: Language,
        case: &CodingTestCase,
        limits: &ExecutionLimits,
    ) -> Result<CaseResult> {
        let slot = self.pool.acquire(self.slot_timeout)?;
        let started = Instant::now();
        let outcome = self.executor.execute(code, language, &case.input, limits);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        drop(slot);

        let mut result = CaseResult {
            index,
            passed: false,
            actual_output: None,
            execution_time_ms: Some(elapsed_ms),
            error: None,
            failure: None,
        };

        match outcome {
            Ok(output) => {
                result.passed = outputs_match(&output, &case.expected_output);
                result.actual_output = Some(output);
            }
            Err(e) if e.is_fatal() => {
                log::warn!("case {} aborted the run: {}", index + 1, e);
                return Err(e.into());
            }
            Err(ExecutionError::ResourceLimitExceeded(limit)) => {
                log::debug!("case {}: {}", index + 1, limit);
                result.error = Some(limit.to_string());
                result.failure = Some(CaseFailure::LimitExceeded(limit));
            }
            Err(ExecutionError::Runtime(message)) => {
                log::debug!("case {}: runtime error: {}", index + 1, message);
                result.error = Some(message);
                result.failure = Some(CaseFailure::RuntimeError);
            }
            Err(other) => return Err(other.into()),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Echoes a canned reply per input, or fails as scripted.
    struct Scripted {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new() -> Self {
            Scripted {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CodeExecutor for Scripted {
        fn execute(
            &self,
            _code: &str,
            _language: Language,
            input: &str,
            _limits: &ExecutionLimits,
        ) -> std::result::Result<String, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(input.to_string());
            match input {
                "boom" => Err(ExecutionError::Runtime("ValueError: boom".to_string())),
                "loop" => Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::WallTime)),
                "oom" => Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::Memory)),
                "broken" => Err(ExecutionError::Infrastructure("fork failed".to_string())),
                "slow" => {
                    thread::sleep(Duration::from_millis(50));
                    Ok("slow\n".to_string())
                }
                other => Ok(format!("  {other}\n")),
            }
        }

        fn available_languages(&self) -> Vec<Language> {
            vec![Language::Python]
        }
    }

    fn runner(executor: Arc<Scripted>, parallelism: usize) -> TestCaseRunner {
        TestCaseRunner::new(
            executor,
            SlotPool::new(2).unwrap(),
            parallelism,
            Duration::from_secs(5),
        )
    }

    fn run(runner: &TestCaseRunner, cases: &[CodingTestCase]) -> Result<RunResult> {
        runner.run("code", Language::Python, cases, &ExecutionLimits::default())
    }

    #[test]
    fn test_trimmed_exact_comparison() {
        assert!(outputs_match("  42\n", "42"));
        assert!(!outputs_match("42.0", "42"));
        assert!(!outputs_match("4 2", "42"));
    }

    #[test]
    fn test_runtime_error_does_not_abort_remaining_cases() {
        let executor = Arc::new(Scripted::new());
        let cases = [
            CodingTestCase::new("boom", "x"),
            CodingTestCase::new("7", "7"),
        ];
        let result = run(&runner(executor.clone(), 1), &cases).unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(!result.per_case[0].passed);
        assert_eq!(result.per_case[0].error.as_deref(), Some("ValueError: boom"));
        assert!(result.per_case[1].passed);
        assert!(result.had_runtime_error);
        assert!(!result.had_timeout);
    }

    #[test]
    fn test_timeout_sets_timeout_flag_not_runtime_flag() {
        let cases = [CodingTestCase::new("loop", "1"), CodingTestCase::new("1", "1")];
        let result = run(&runner(Arc::new(Scripted::new()), 1), &cases).unwrap();
        assert!(result.had_timeout);
        assert!(!result.had_runtime_error);
        assert_eq!(
            result.per_case[0].failure,
            Some(CaseFailure::LimitExceeded(ResourceLimit::WallTime))
        );
    }

    #[test]
    fn test_memory_limit_counts_as_runtime_error() {
        let cases = [CodingTestCase::new("oom", "1")];
        let result = run(&runner(Arc::new(Scripted::new()), 1), &cases).unwrap();
        assert!(result.had_runtime_error);
        assert!(!result.had_timeout);
    }

    #[test]
    fn test_average_covers_successful_cases_only() {
        let cases = [
            CodingTestCase::new("slow", "slow"),
            CodingTestCase::new("boom", ""),
        ];
        let result = run(&runner(Arc::new(Scripted::new()), 1), &cases).unwrap();
        let slow = result.per_case[0].execution_time_ms.unwrap();
        assert!((result.avg_time_ms - slow).abs() < f64::EPSILON);
    }

    #[test]
    fn test_infrastructure_failure_aborts() {
        let cases = [CodingTestCase::new("broken", ""), CodingTestCase::new("1", "1")];
        let result = run(&runner(Arc::new(Scripted::new()), 1), &cases);
        assert!(matches!(result, Err(GradeError::Infrastructure(_))));
    }

    #[test]
    fn test_empty_case_list_rejected() {
        let result = run(&runner(Arc::new(Scripted::new()), 1), &[]);
        assert!(matches!(result, Err(GradeError::Config(_))));
    }

    #[test]
    fn test_parallel_results_keep_input_order() {
        let executor = Arc::new(Scripted::new());
        let cases: Vec<CodingTestCase> = ["slow", "1", "boom", "2", "slow", "3"]
            .iter()
            .map(|input| CodingTestCase::new(*input, *input))
            .collect();
        let result = run(&runner(executor.clone(), 3), &cases).unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 6);
        let indices: Vec<usize> = result.per_case.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(result.per_case[1].actual_output.as_deref(), Some("  1\n"));
        assert!(!result.per_case[2].passed);
        assert_eq!(result.cases_passed(), 5);
    }
}
