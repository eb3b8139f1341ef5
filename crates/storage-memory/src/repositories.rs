// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Duration;
use futures_util::{FutureExt, future::BoxFuture};
use janitor_data_model::{
    Course, CourseScope, Question, QuestionCategory, QuestionStatistics, QuestionStatus,
    QuestionUsageInfo, Quiz, QuizAttempt, User,
};
use janitor_storage::{
    Clock, DuplicateGroup, Pagination, Repository, RepositoryAccess, RepositoryTransaction,
    attempt::{QuizAttemptFilter, QuizAttemptRepository},
    category::QuestionCategoryRepository,
    course::CourseRepository,
    qtype::{QuestionTypeRepository, SatelliteRecord, SatelliteTable},
    question::QuestionRepository,
    queue::{Job, QueueJobRepository},
    user::UserRepository,
};

use crate::{MemoryError, MemoryStore, Operation, state::JobRow};

/// A repository over a [`MemoryStore`]
pub struct MemoryRepository {
    store: MemoryStore,
}

impl MemoryRepository {
    /// Create a repository over the given store
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl Repository<MemoryError> for MemoryRepository {}

impl RepositoryTransaction for MemoryRepository {
    type Error = MemoryError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        async { Ok(()) }.boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        async { Ok(()) }.boxed()
    }
}

impl RepositoryAccess for MemoryRepository {
    type Error = MemoryError;

    fn course<'c>(&'c mut self) -> Box<dyn CourseRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn quiz_attempt<'c>(
        &'c mut self,
    ) -> Box<dyn QuizAttemptRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn question<'c>(&'c mut self) -> Box<dyn QuestionRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn question_category<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionCategoryRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn question_type<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionTypeRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }

    fn queue_job<'c>(&'c mut self) -> Box<dyn QueueJobRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryTables::new(&self.store))
    }
}

/// Every repository trait is implemented on this single view of the store
struct MemoryTables<'c> {
    store: &'c MemoryStore,
}

impl<'c> MemoryTables<'c> {
    fn new(store: &'c MemoryStore) -> Self {
        Self { store }
    }
}

fn page<T: janitor_storage::Node>(rows: Vec<T>, pagination: Pagination) -> Vec<T> {
    rows.into_iter()
        .filter(|row| pagination.includes(row.cursor()))
        .take(pagination.count)
        .collect()
}

#[async_trait]
impl CourseRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, id: i64) -> Result<Option<Course>, Self::Error> {
        Ok(self.store.with_state(|state| state.courses.get(&id).cloned()))
    }

    async fn list_except(&mut self, site_course_id: i64) -> Result<Vec<Course>, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .courses
                .values()
                .filter(|course| course.id != site_course_id)
                .cloned()
                .collect()
        }))
    }

    async fn context_id(&mut self, course_id: i64) -> Result<Option<i64>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.course_contexts.get(&course_id).copied()))
    }

    async fn lookup_quiz(&mut self, id: i64) -> Result<Option<Quiz>, Self::Error> {
        Ok(self.store.with_state(|state| state.quizzes.get(&id).cloned()))
    }
}

#[async_trait]
impl QuizAttemptRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn count(&mut self, filter: QuizAttemptFilter) -> Result<usize, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .attempts
                .values()
                .filter(|attempt| state.attempt_matches(attempt, &filter))
                .count()
        }))
    }

    async fn list(
        &mut self,
        filter: QuizAttemptFilter,
        pagination: Pagination,
    ) -> Result<Vec<QuizAttempt>, Self::Error> {
        let rows = self.store.with_state(|state| {
            state
                .attempts
                .values()
                .filter(|attempt| state.attempt_matches(attempt, &filter))
                .cloned()
                .collect()
        });
        Ok(page(rows, pagination))
    }

    async fn delete(&mut self, attempt: &QuizAttempt) -> Result<(), Self::Error> {
        self.store.record(Operation::DeleteAttempt(attempt.id))?;
        self.store
            .with_state(|state| state.delete_attempt(attempt.id));
        Ok(())
    }
}

#[async_trait]
impl QuestionRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, id: i64) -> Result<Option<Question>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.questions.get(&id).cloned()))
    }

    async fn exists(&mut self, id: i64) -> Result<bool, Self::Error> {
        Ok(self.store.has_question(id))
    }

    async fn count_unused(&mut self, context_id: Option<i64>) -> Result<usize, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .questions_in(context_id)
                .filter(|question| state.is_unused(question.id))
                .count()
        }))
    }

    async fn list_unused(
        &mut self,
        context_id: Option<i64>,
        pagination: Pagination,
    ) -> Result<Vec<Question>, Self::Error> {
        let rows = self.store.with_state(|state| {
            state
                .questions_in(context_id)
                .filter(|question| state.is_unused(question.id))
                .cloned()
                .collect()
        });
        Ok(page(rows, pagination))
    }

    async fn duplicate_names(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<DuplicateGroup>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.duplicate_question_names(context_id)))
    }

    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<Question>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.questions_named(context_id, name)))
    }

    async fn find_usage(&mut self, id: i64) -> Result<Option<QuestionUsageInfo>, Self::Error> {
        Ok(self.store.with_state(|state| state.usage_info(id)))
    }

    async fn delete(&mut self, id: i64) -> Result<(), Self::Error> {
        self.store.record(Operation::DeleteQuestion(id))?;
        let mut inner = self.store.lock();
        if !inner.refused.contains(&id) {
            inner.state.delete_question(id);
        }
        Ok(())
    }

    async fn list_missing_options(
        &mut self,
        context_id: Option<i64>,
        qtype: &str,
        table: SatelliteTable,
    ) -> Result<Vec<Question>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.missing_options(context_id, qtype, table)))
    }

    async fn list_without_answers(
        &mut self,
        context_id: Option<i64>,
        qtypes: &[&str],
    ) -> Result<Vec<Question>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.without_answers(context_id, qtypes)))
    }

    async fn statistics(&mut self, context_id: i64) -> Result<QuestionStatistics, Self::Error> {
        Ok(self.store.with_state(|state| state.statistics(context_id)))
    }

    async fn count_by_qtype(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(String, usize)>, Self::Error> {
        Ok(self.store.with_state(|state| {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for question in state.questions_in(Some(context_id)) {
                *counts.entry(question.qtype.clone()).or_default() += 1;
            }
            counts.into_iter().collect()
        }))
    }

    async fn count_by_status(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(QuestionStatus, usize)>, Self::Error> {
        Ok(self.store.with_state(|state| {
            let mut counts: BTreeMap<&'static str, (QuestionStatus, usize)> = BTreeMap::new();
            for question in state.questions_in(Some(context_id)) {
                if let Some(version) = state.versions.get(&question.id) {
                    counts
                        .entry(version.status.as_str())
                        .or_insert((version.status, 0))
                        .1 += 1;
                }
            }
            counts.into_values().collect()
        }))
    }
}

#[async_trait]
impl QuestionCategoryRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, id: i64) -> Result<Option<QuestionCategory>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.categories.get(&id).cloned()))
    }

    async fn duplicate_names(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<DuplicateGroup>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.duplicate_category_names(context_id)))
    }

    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<QuestionCategory>, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.categories_named(context_id, name)))
    }

    async fn list(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<QuestionCategory>, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .categories
                .values()
                .filter(|category| context_id.is_none_or(|id| id == category.context_id))
                .cloned()
                .collect()
        }))
    }

    async fn count_questions(&mut self, id: i64) -> Result<usize, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.category_question_count(id)))
    }

    async fn count_children(&mut self, id: i64) -> Result<usize, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .categories
                .values()
                .filter(|category| category.parent_id == id)
                .count()
        }))
    }

    async fn delete(&mut self, id: i64) -> Result<(), Self::Error> {
        self.store.record(Operation::DeleteCategory(id))?;
        let mut inner = self.store.lock();
        if !inner.refused.contains(&id) {
            inner.state.categories.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl QuestionTypeRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn table_exists(&mut self, table: SatelliteTable) -> Result<bool, Self::Error> {
        Ok(self
            .store
            .with_state(|state| state.satellite_tables.contains(table.name)))
    }

    async fn insert(&mut self, record: &SatelliteRecord) -> Result<(), Self::Error> {
        self.store
            .record(Operation::InsertOptions(record.question_id))?;
        self.store.with_state(|state| {
            if !state.satellite_tables.contains(record.table.name) {
                return Err(MemoryError::UnknownTable(record.table.name.to_owned()));
            }
            state
                .satellites
                .insert((record.table.name, record.question_id), record.clone());
            Ok(())
        })
    }
}

#[async_trait]
impl UserRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, id: i64) -> Result<Option<User>, Self::Error> {
        Ok(self.store.with_state(|state| state.users.get(&id).cloned()))
    }
}

/// The course a job payload targets, `0` meaning all courses
fn payload_scope(job: &Job) -> CourseScope {
    match job.payload.get("courseid").and_then(serde_json::Value::as_i64) {
        Some(id) if id > 0 => CourseScope::Course(id),
        _ => CourseScope::All,
    }
}

#[async_trait]
impl QueueJobRepository for MemoryTables<'_> {
    type Error = MemoryError;

    async fn schedule(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<i64, Self::Error> {
        let now = clock.now();
        Ok(self.store.with_state(|state| {
            let id = state.next_id();
            state.jobs.insert(
                id,
                JobRow {
                    job: Job {
                        id,
                        queue_name: queue_name.to_owned(),
                        payload,
                        created_at: now,
                    },
                    started_at: None,
                    fail_delay: 0,
                    next_run_at: now,
                },
            );
            id
        }))
    }

    async fn find_pending(
        &mut self,
        queue_name: &str,
        course_scope: CourseScope,
    ) -> Result<Option<Job>, Self::Error> {
        Ok(self.store.with_state(|state| {
            state
                .jobs
                .values()
                .filter(|row| row.job.queue_name == queue_name && row.fail_delay == 0)
                .find(|row| payload_scope(&row.job) == course_scope)
                .map(|row| row.job.clone())
        }))
    }

    async fn reserve(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        count: usize,
    ) -> Result<Vec<Job>, Self::Error> {
        let now = clock.now();
        Ok(self.store.with_state(|state| {
            state
                .jobs
                .values_mut()
                .filter(|row| {
                    row.job.queue_name == queue_name
                        && row.started_at.is_none()
                        && row.next_run_at <= now
                })
                .take(count)
                .map(|row| {
                    row.started_at = Some(now);
                    row.job.clone()
                })
                .collect()
        }))
    }

    async fn release_stale(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        lease: Duration,
    ) -> Result<usize, Self::Error> {
        let threshold = clock.now() - lease;
        Ok(self.store.with_state(|state| {
            let mut released = 0;
            for row in state.jobs.values_mut() {
                if row.job.queue_name == queue_name
                    && row.started_at.is_some_and(|started_at| started_at < threshold)
                {
                    row.started_at = None;
                    released += 1;
                }
            }
            released
        }))
    }

    async fn mark_as_completed(&mut self, id: i64) -> Result<(), Self::Error> {
        self.store.record(Operation::CompleteJob(id))?;
        self.store.with_state(|state| state.jobs.remove(&id));
        Ok(())
    }

    async fn mark_as_failed(&mut self, clock: &dyn Clock, id: i64) -> Result<(), Self::Error> {
        let now = clock.now();
        self.store.with_state(|state| {
            if let Some(row) = state.jobs.get_mut(&id) {
                row.fail_delay = (row.fail_delay * 2).max(60);
                row.next_run_at = now + Duration::seconds(row.fail_delay);
                row.started_at = None;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use janitor_data_model::QuestionStatus;
    use janitor_storage::{
        RepositoryFactory,
        clock::MockClock,
        queue::{CleanupCourseJob, InsertableJob, QueueJobRepositoryExt},
    };

    use super::*;

    #[tokio::test]
    async fn used_and_pinned_questions_are_not_deleted() {
        let store = MemoryStore::new();
        let context = store.add_course(2, "Physics");
        let category = store.add_category(context, "Default", "a");
        let used = store.add_question(category, "Q", "essay", 10, QuestionStatus::Hidden);
        let pinned = store.add_question(category, "Q", "essay", 20, QuestionStatus::Hidden);
        let previewed = store.add_question(category, "Q", "essay", 30, QuestionStatus::Hidden);
        let quiz = store.add_quiz(2, "Quiz");
        store.add_attempt(quiz, 100, &[used]);
        store.add_reference(pinned, None);
        store.add_preview(previewed);

        let mut repo = store.factory().create().await.unwrap();
        assert_eq!(repo.question().count_unused(Some(context)).await.unwrap(), 1);

        for id in [used, pinned, previewed] {
            repo.question().delete(id).await.unwrap();
        }
        assert!(store.has_question(used));
        assert!(store.has_question(pinned));
        assert!(!store.has_question(previewed));

        let usage = repo.question().find_usage(used).await.unwrap().unwrap();
        assert_eq!(usage.course_id, Some(2));
        assert_eq!(usage.activity.as_deref(), Some("Quiz"));
        assert_eq!(
            store.operations(),
            vec![
                Operation::DeleteQuestion(used),
                Operation::DeleteQuestion(pinned),
                Operation::DeleteQuestion(previewed),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryStore::new();
        let context = store.add_course(2, "Physics");
        let category = store.add_category(context, "Default", "a");
        store.fail_on(Operation::DeleteCategory(category));

        let mut repo = store.factory().create().await.unwrap();
        assert!(repo.question_category().delete(category).await.is_err());
        assert!(store.has_category(category));
    }

    #[tokio::test]
    async fn failed_jobs_are_retried_later() {
        let clock = MockClock::default();
        let store = MemoryStore::new();
        let mut repo = store.factory().create().await.unwrap();

        let job = CleanupCourseJob::new(CourseScope::Course(3), None);
        let id = repo.queue_job().schedule_job(&clock, job.clone()).await.unwrap();
        assert!(repo.queue_job().find_pending_job(&job).await.unwrap().is_some());
        let other = CleanupCourseJob::new(CourseScope::All, None);
        assert!(repo.queue_job().find_pending_job(&other).await.unwrap().is_none());

        let jobs = repo
            .queue_job()
            .reserve(&clock, CleanupCourseJob::QUEUE_NAME, 10)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        repo.queue_job().mark_as_failed(&clock, id).await.unwrap();
        assert!(repo.queue_job().find_pending_job(&job).await.unwrap().is_none());
        assert_eq!(
            store.job_next_run(id),
            Some(clock.now() + Duration::seconds(60))
        );

        // Not due yet
        let jobs = repo
            .queue_job()
            .reserve(&clock, CleanupCourseJob::QUEUE_NAME, 10)
            .await
            .unwrap();
        assert!(jobs.is_empty());

        clock.advance(Duration::seconds(60));
        let jobs = repo
            .queue_job()
            .reserve(&clock, CleanupCourseJob::QUEUE_NAME, 10)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        repo.queue_job().mark_as_completed(id).await.unwrap();
        assert_eq!(store.job_count(), 0);
    }
}
