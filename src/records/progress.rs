/// Practice progress: one row per (student, question), merged monotonically.
use crate::config::types::Result;
use crate::records::store::ProgressStore;
use crate::verdict::grade::GradeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotAttempted,
    Attempted,
    Solved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeCodingProgress {
    pub student_id: Uuid,
    pub question_id: Uuid,
    pub status: ProgressStatus,
    pub best_score: u32,
    pub attempts: u32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    /// Set on the first transition into `Solved`, never changed afterwards
    pub solved_at: Option<DateTime<Utc>>,
}

impl PracticeCodingProgress {
    pub fn not_attempted(student_id: Uuid, question_id: Uuid) -> Self {
        PracticeCodingProgress {
            student_id,
            question_id,
            status: ProgressStatus::NotAttempted,
            best_score: 0,
            attempts: 0,
            last_attempted_at: None,
            solved_at: None,
        }
    }

    /// Fold one graded attempt in. Nothing here can move backwards:
    /// attempts only grow, best_score is a max, solved is terminal.
    pub fn apply_attempt(&mut self, grade: &GradeResult, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.best_score = self.best_score.max(grade.score);
        self.last_attempted_at = Some(at);

        if grade.is_accepted() && self.status != ProgressStatus::Solved {
            self.status = ProgressStatus::Solved;
            self.solved_at.get_or_insert(at);
        } else if self.status == ProgressStatus::NotAttempted {
            self.status = ProgressStatus::Attempted;
        }
    }

    pub fn is_solved(&self) -> bool {
        self.status == ProgressStatus::Solved
    }
}

pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        ProgressTracker { store }
    }

    pub fn upsert_progress(
        &self,
        student_id: Uuid,
        question_id: Uuid,
        grade: &GradeResult,
    ) -> Result<PracticeCodingProgress> {
        self.upsert_progress_at(student_id, question_id, grade, Utc::now())
    }

    /// Same as `upsert_progress` with an explicit attempt time
    pub fn upsert_progress_at(
        &self,
        student_id: Uuid,
        question_id: Uuid,
        grade: &GradeResult,
        at: DateTime<Utc>,
    ) -> Result<PracticeCodingProgress> {
        let progress = self
            .store
            .upsert_with(student_id, question_id, &mut |row: &mut PracticeCodingProgress| {
                row.apply_attempt(grade, at)
            })?;
        log::debug!(
            "progress {}/{}: {:?} best={} attempts={}",
            student_id,
            question_id,
            progress.status,
            progress.best_score,
            progress.attempts
        );
        Ok(progress)
    }

    pub fn get(&self, student_id: Uuid, question_id: Uuid) -> Result<Option<PracticeCodingProgress>> {
        self.store.get(student_id, question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SubmissionStatus;
    use crate::records::store::InMemoryProgressStore;
    use chrono::Duration;

    fn grade(score: u32, accepted: bool) -> GradeResult {
        GradeResult {
            status: if accepted {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::WrongAnswer
            },
            score,
            cases_passed: if accepted { 2 } else { 1 },
            total_cases: 2,
        }
    }

    #[test]
    fn test_first_attempt_creates_row() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()));
        let (student, question) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(tracker.get(student, question).unwrap().is_none());

        let row = tracker.upsert_progress(student, question, &grade(40, false)).unwrap();
        assert_eq!(row.status, ProgressStatus::Attempted);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.best_score, 40);
        assert!(row.solved_at.is_none());
    }

    #[test]
    fn test_first_attempt_accepted_is_solved() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()));
        let row = tracker
            .upsert_progress(Uuid::new_v4(), Uuid::new_v4(), &grade(100, true))
            .unwrap();
        assert!(row.is_solved());
        assert_eq!(row.solved_at, row.last_attempted_at);
    }

    #[test]
    fn test_worse_attempts_never_regress() {
        let mut row = PracticeCodingProgress::not_attempted(Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();
        row.apply_attempt(&grade(100, true), t0);
        let solved_at = row.solved_at;

        for (i, score) in [0, 60, 99].into_iter().enumerate() {
            row.apply_attempt(&grade(score, false), t0 + Duration::minutes(i as i64 + 1));
            assert_eq!(row.best_score, 100);
            assert!(row.is_solved());
            assert_eq!(row.solved_at, solved_at);
        }
        // A second accepted run does not move solved_at either.
        row.apply_attempt(&grade(100, true), t0 + Duration::hours(1));
        assert_eq!(row.solved_at, solved_at);
        assert_eq!(row.attempts, 5);
    }
}
