/// Weighted scoring and submission status
///
/// Pure functions over a run result and the case list it was produced from.
use crate::config::types::SubmissionStatus;
use crate::exec::runner::RunResult;
use crate::records::models::CodingTestCase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeResult {
    pub status: SubmissionStatus,
    /// Integer in 0..=100
    pub score: u32,
    pub cases_passed: usize,
    pub total_cases: usize,
}

impl GradeResult {
    pub fn is_accepted(&self) -> bool {
        self.status == SubmissionStatus::Accepted
    }
}

pub struct Grader;

impl Grader {
    /// Derive status and score. A case without a result counts as failed.
    pub fn grade(run: &RunResult, test_cases: &[CodingTestCase]) -> GradeResult {
        let passed = |index: usize| {
            run.per_case
                .iter()
                .find(|case| case.index == index)
                .is_some_and(|case| case.passed)
        };

        let total_weight: u64 = test_cases.iter().map(|case| u64::from(case.weight)).sum();
        let earned_weight: u64 = test_cases
            .iter()
            .enumerate()
            .filter(|(index, _)| passed(*index))
            .map(|(_, case)| u64::from(case.weight))
            .sum();

        let cases_passed = (0..test_cases.len()).filter(|index| passed(*index)).count();
        let total_cases = test_cases.len();

        GradeResult {
            status: Self::status(run, cases_passed, total_cases),
            score: weighted_score(earned_weight, total_weight),
            cases_passed,
            total_cases,
        }
    }

    /// First match wins: accepted, runtime_error, time_limit_exceeded,
    /// wrong_answer. Nothing to pass is never accepted.
    fn status(run: &RunResult, cases_passed: usize, total_cases: usize) -> SubmissionStatus {
        if total_cases == 0 {
            SubmissionStatus::WrongAnswer
        } else if cases_passed == total_cases {
            SubmissionStatus::Accepted
        } else if run.had_runtime_error {
            SubmissionStatus::RuntimeError
        } else if run.had_timeout {
            SubmissionStatus::TimeLimitExceeded
        } else {
            SubmissionStatus::WrongAnswer
        }
    }
}

/// round(100 * earned / total) with halves rounding up; 0 for no weight.
pub fn weighted_score(earned_weight: u64, total_weight: u64) -> u32 {
    if total_weight == 0 {
        return 0;
    }
    let earned = earned_weight.min(total_weight);
    ((200 * earned + total_weight) / (2 * total_weight)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ResourceLimit;
    use crate::exec::runner::{CaseFailure, CaseResult};

    fn case(index: usize, passed: bool, failure: Option<CaseFailure>) -> CaseResult {
        CaseResult {
            index,
            passed,
            actual_output: passed.then(|| "ok".to_string()),
            execution_time_ms: Some(1.0),
            error: failure.map(|_| "failed".to_string()),
            failure,
        }
    }

    fn weights(weights: &[u32]) -> Vec<CodingTestCase> {
        weights
            .iter()
            .map(|w| CodingTestCase::new("", "").weighted(*w))
            .collect()
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(weighted_score(1, 3), 33);
        assert_eq!(weighted_score(2, 3), 67);
        assert_eq!(weighted_score(1, 8), 13); // 12.5 rounds up
        assert_eq!(weighted_score(0, 0), 0);
        assert_eq!(weighted_score(5, 5), 100);
    }

    #[test]
    fn test_all_passed_is_accepted() {
        let run = RunResult::from_cases(vec![case(0, true, None), case(1, true, None)]);
        let grade = Grader::grade(&run, &weights(&[50, 50]));
        assert_eq!(grade.status, SubmissionStatus::Accepted);
        assert_eq!(grade.score, 100);
        assert_eq!(grade.cases_passed, 2);
    }

    #[test]
    fn test_runtime_error_beats_timeout() {
        let run = RunResult::from_cases(vec![
            case(0, false, Some(CaseFailure::RuntimeError)),
            case(1, false, Some(CaseFailure::LimitExceeded(ResourceLimit::WallTime))),
            case(2, true, None),
        ]);
        let grade = Grader::grade(&run, &weights(&[1, 1, 2]));
        assert_eq!(grade.status, SubmissionStatus::RuntimeError);
        assert_eq!(grade.score, 50);
    }

    #[test]
    fn test_timeout_status_and_wrong_answer() {
        let run = RunResult::from_cases(vec![
            case(0, false, Some(CaseFailure::LimitExceeded(ResourceLimit::CpuTime))),
            case(1, true, None),
        ]);
        assert_eq!(
            Grader::grade(&run, &weights(&[1, 1])).status,
            SubmissionStatus::TimeLimitExceeded
        );

        let run = RunResult::from_cases(vec![case(0, false, None), case(1, true, None)]);
        assert_eq!(
            Grader::grade(&run, &weights(&[1, 1])).status,
            SubmissionStatus::WrongAnswer
        );
    }

    #[test]
    fn test_zero_weight_scores_zero_but_can_be_accepted() {
        let run = RunResult::from_cases(vec![case(0, true, None)]);
        let grade = Grader::grade(&run, &weights(&[0]));
        assert_eq!(grade.score, 0);
        assert_eq!(grade.status, SubmissionStatus::Accepted);
    }

    #[test]
    fn test_empty_case_list_is_not_accepted() {
        let grade = Grader::grade(&RunResult::from_cases(Vec::new()), &[]);
        assert_eq!(grade.status, SubmissionStatus::WrongAnswer);
        assert_eq!(grade.score, 0);
        assert_eq!(grade.total_cases, 0);
        assert!(!grade.is_accepted());
    }
}
