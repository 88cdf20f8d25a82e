//! Persistence seams for submissions and practice progress.
//!
//! Real deployments plug the platform's document store in behind these
//! traits; the in-memory stores back the CLI and the tests.

use crate::config::types::{GradeError, Result};
use crate::records::progress::PracticeCodingProgress;
use crate::records::submission::CodingSubmission;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Insert-only submission storage. There is no update path.
pub trait SubmissionStore: Send + Sync {
    /// Fails if a submission with the same id already exists.
    fn insert(&self, submission: CodingSubmission) -> Result<()>;

    fn get(&self, id: Uuid) -> Result<Option<CodingSubmission>>;

    /// All submissions of a student for a question, oldest first
    fn list_for(&self, student_id: Uuid, question_id: Uuid) -> Result<Vec<CodingSubmission>>;
}

/// Practice progress storage keyed by (student, question)
pub trait ProgressStore: Send + Sync {
    fn get(&self, student_id: Uuid, question_id: Uuid) -> Result<Option<PracticeCodingProgress>>;

    /// Atomically load (or create as not-attempted) the row, run `merge` on
    /// it and store the result. Concurrent upserts on one key serialize.
    fn upsert_with(
        &self,
        student_id: Uuid,
        question_id: Uuid,
        merge: &mut dyn FnMut(&mut PracticeCodingProgress),
    ) -> Result<PracticeCodingProgress>;
}

fn poisoned<T>(_: T) -> GradeError {
    GradeError::Store("store lock poisoned".to_string())
}

#[derive(Default)]
pub struct InMemorySubmissionStore {
    submissions: RwLock<Vec<CodingSubmission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.submissions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubmissionStore for InMemorySubmissionStore {
    fn insert(&self, submission: CodingSubmission) -> Result<()> {
        let mut submissions = self.submissions.write().map_err(poisoned)?;
        if submissions.iter().any(|s| s.id() == submission.id()) {
            return Err(GradeError::Store(format!(
                "submission {} already recorded",
                submission.id()
            )));
        }
        submissions.push(submission);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<CodingSubmission>> {
        let submissions = self.submissions.read().map_err(poisoned)?;
        Ok(submissions.iter().find(|s| s.id() == id).cloned())
    }

    fn list_for(&self, student_id: Uuid, question_id: Uuid) -> Result<Vec<CodingSubmission>> {
        let submissions = self.submissions.read().map_err(poisoned)?;
        Ok(submissions
            .iter()
            .filter(|s| s.student_id() == student_id && s.question_id() == question_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    rows: Mutex<HashMap<(Uuid, Uuid), PracticeCodingProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn get(&self, student_id: Uuid, question_id: Uuid) -> Result<Option<PracticeCodingProgress>> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows.get(&(student_id, question_id)).cloned())
    }

    fn upsert_with(
        &self,
        student_id: Uuid,
        question_id: Uuid,
        merge: &mut dyn FnMut(&mut PracticeCodingProgress),
    ) -> Result<PracticeCodingProgress> {
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let row = rows
            .entry((student_id, question_id))
            .or_insert_with(|| PracticeCodingProgress::not_attempted(student_id, question_id));
        merge(row);
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SubmissionStatus;
    use crate::verdict::grade::GradeResult;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_upserts_count_every_attempt() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (student, question) = (Uuid::new_v4(), Uuid::new_v4());
        let grade = GradeResult {
            status: SubmissionStatus::WrongAnswer,
            score: 10,
            cases_passed: 0,
            total_cases: 1,
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .upsert_with(student, question, &mut |row: &mut PracticeCodingProgress| {
                                row.apply_attempt(&grade, chrono::Utc::now())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let row = store.get(student, question).unwrap().unwrap();
        assert_eq!(row.attempts, 200);
    }

    #[test]
    fn test_empty_submission_store() {
        let store = InMemorySubmissionStore::new();
        assert!(store.is_empty());
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
        assert!(store.list_for(Uuid::new_v4(), Uuid::new_v4()).unwrap().is_empty());
    }
}
