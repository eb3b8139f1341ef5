// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An in-memory implementation of the repositories, for tests.
//!
//! It models the subset of the LMS schema the cleanup operations touch, and
//! records every mutation so tests can assert on what was attempted. Failures
//! can be injected per row.
//!
//! There is no transaction isolation: changes are visible as soon as they
//! are made, and cancelling a repository doesn't roll anything back.

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use janitor_data_model::{
    Course, PREVIEW_COMPONENT, Question, QuestionCategory, QuestionStatus, Quiz, QuizAttempt,
    User,
};
use janitor_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, RepositoryError, RepositoryFactory,
    clock::MockClock,
    qtype::{SatelliteRecord, SatelliteTable},
};
use thiserror::Error;

mod repositories;
mod state;

pub use self::repositories::MemoryRepository;
use self::state::{MemoryState, QuestionAttemptRow, ReferenceRow, Usage, VersionRow};

/// An error returned by the in-memory store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A failure injected with [`MemoryStore::fail_on`]
    #[error("injected failure on {0:?}")]
    Injected(Operation),

    /// The table doesn't exist
    #[error("table {0:?} does not exist")]
    UnknownTable(String),
}

/// A mutation which was attempted on the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Deleting a quiz attempt
    DeleteAttempt(i64),

    /// Deleting a question
    DeleteQuestion(i64),

    /// Deleting a question category
    DeleteCategory(i64),

    /// Inserting type-specific options for a question
    InsertOptions(i64),

    /// Removing a finished job from the queue
    CompleteJob(i64),
}

#[derive(Default)]
struct Inner {
    state: MemoryState,
    operations: Vec<Operation>,
    failures: BTreeSet<Operation>,
    refused: BTreeSet<i64>,
    ticker: Option<(Arc<MockClock>, Duration)>,
}

/// A shared in-memory LMS database
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.lock().state)
    }

    /// Record an attempted mutation, failing if a failure was injected for it
    /// and moving the ticking clock forward
    fn record(&self, operation: Operation) -> Result<(), MemoryError> {
        let mut inner = self.lock();
        inner.operations.push(operation);
        if let Some((clock, step)) = &inner.ticker {
            clock.advance(*step);
        }

        if inner.failures.contains(&operation) {
            return Err(MemoryError::Injected(operation));
        }
        Ok(())
    }

    /// Get a [`RepositoryFactory`] backed by this store
    #[must_use]
    pub fn factory(&self) -> BoxRepositoryFactory {
        Box::new(MemoryRepositoryFactory {
            store: self.clone(),
        })
    }

    /// Make the given operation fail
    pub fn fail_on(&self, operation: Operation) {
        self.lock().failures.insert(operation);
    }

    /// Make deleting the question or category with the given ID silently do
    /// nothing, like the LMS does for questions it still considers in use
    pub fn refuse_delete(&self, id: i64) {
        self.lock().refused.insert(id);
    }

    /// Advance the given clock by `step` on every mutation
    pub fn tick_on_mutation(&self, clock: Arc<MockClock>, step: Duration) {
        self.lock().ticker = Some((clock, step));
    }

    /// All the mutations attempted so far, in order
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Add a course, returning the ID of its context
    pub fn add_course(&self, id: i64, full_name: &str) -> i64 {
        self.with_state(|state| {
            let context_id = state.next_id();
            state.courses.insert(
                id,
                Course {
                    id,
                    short_name: full_name.to_lowercase().replace(' ', "-"),
                    full_name: full_name.to_owned(),
                },
            );
            state.course_contexts.insert(id, context_id);
            context_id
        })
    }

    /// Add a question category at the root of a context
    pub fn add_category(&self, context_id: i64, name: &str, stamp: &str) -> i64 {
        self.with_state(|state| Self::insert_category(state, context_id, 0, name, stamp))
    }

    /// Add a question category under another one, in the same context
    ///
    /// Returns `None` if the parent doesn't exist
    pub fn add_subcategory(&self, parent_id: i64, name: &str, stamp: &str) -> Option<i64> {
        self.with_state(|state| {
            let context_id = state.categories.get(&parent_id)?.context_id;
            Some(Self::insert_category(
                state, context_id, parent_id, name, stamp,
            ))
        })
    }

    fn insert_category(
        state: &mut MemoryState,
        context_id: i64,
        parent_id: i64,
        name: &str,
        stamp: &str,
    ) -> i64 {
        let id = state.next_id();
        state.categories.insert(
            id,
            QuestionCategory {
                id,
                name: name.to_owned(),
                context_id,
                parent_id,
                stamp: stamp.to_owned(),
            },
        );
        id
    }

    /// Add a question, in its own bank entry, with a single version
    pub fn add_question(
        &self,
        category_id: i64,
        name: &str,
        qtype: &str,
        created_at: i64,
        status: QuestionStatus,
    ) -> i64 {
        self.with_state(|state| {
            let entry_id = state.next_id();
            state.entries.insert(entry_id, category_id);
            Self::insert_version(state, entry_id, name, qtype, created_at, status)
        })
    }

    /// Add a new version of the question with the given ID, in the same bank
    /// entry
    ///
    /// Returns `None` if the question doesn't exist
    pub fn add_version(&self, question_id: i64, status: QuestionStatus) -> Option<i64> {
        self.with_state(|state| {
            let question = state.questions.get(&question_id)?.clone();
            let entry_id = state.versions.get(&question_id)?.entry_id;
            Some(Self::insert_version(
                state,
                entry_id,
                &question.name,
                &question.qtype,
                question.created_at.timestamp() + 1,
                status,
            ))
        })
    }

    fn insert_version(
        state: &mut MemoryState,
        entry_id: i64,
        name: &str,
        qtype: &str,
        created_at: i64,
        status: QuestionStatus,
    ) -> i64 {
        let category_id = state.entries.get(&entry_id).copied().unwrap_or_default();
        let version = state
            .versions
            .values()
            .filter(|v| v.entry_id == entry_id)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let id = state.next_id();
        state.questions.insert(
            id,
            Question {
                id,
                name: name.to_owned(),
                qtype: qtype.to_owned(),
                created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
                category_id,
            },
        );
        state.versions.insert(
            id,
            VersionRow {
                entry_id,
                version,
                status,
            },
        );
        id
    }

    /// Add a reference to the bank entry of a question, pinning the given
    /// version, or the latest one
    pub fn add_reference(&self, question_id: i64, version: Option<i64>) {
        self.with_state(|state| {
            if let Some(row) = state.versions.get(&question_id) {
                let entry_id = row.entry_id;
                state.references.push(ReferenceRow { entry_id, version });
            }
        });
    }

    /// Add an answer to a question
    pub fn add_answer(&self, question_id: i64) {
        self.with_state(|state| state.answers.insert(question_id));
    }

    /// Create a type-specific table
    pub fn add_table(&self, table: SatelliteTable) {
        self.with_state(|state| state.satellite_tables.insert(table.name));
    }

    /// Add a row in a type-specific table
    pub fn add_options(&self, table: SatelliteTable, question_id: i64) {
        self.with_state(|state| {
            state.satellite_tables.insert(table.name);
            state.satellites.insert(
                (table.name, question_id),
                SatelliteRecord::new(table, question_id),
            );
        });
    }

    /// Get the type-specific row of a question, if any
    #[must_use]
    pub fn options(&self, table: SatelliteTable, question_id: i64) -> Option<SatelliteRecord> {
        self.with_state(|state| state.satellites.get(&(table.name, question_id)).cloned())
    }

    /// Add a quiz to a course
    pub fn add_quiz(&self, course_id: i64, name: &str) -> i64 {
        self.with_state(|state| {
            let id = state.next_id();
            state.quizzes.insert(
                id,
                Quiz {
                    id,
                    course_id,
                    name: name.to_owned(),
                },
            );
            id
        })
    }

    /// Add an attempt on a quiz, with the given questions attempted in it
    pub fn add_attempt(&self, quiz_id: i64, started_at: i64, questions: &[i64]) -> i64 {
        self.with_state(|state| {
            let usage_id = state.next_id();
            let context_id = state
                .quizzes
                .get(&quiz_id)
                .and_then(|quiz| state.course_contexts.get(&quiz.course_id))
                .copied()
                .unwrap_or_default();
            state.usages.insert(
                usage_id,
                Usage {
                    component: "mod_quiz".to_owned(),
                    context_id,
                },
            );
            for question_id in questions {
                let id = state.next_id();
                state.question_attempts.insert(
                    id,
                    QuestionAttemptRow {
                        usage_id,
                        question_id: *question_id,
                    },
                );
            }

            let id = state.next_id();
            state.attempts.insert(
                id,
                QuizAttempt {
                    id,
                    quiz_id,
                    user_id: 2,
                    usage_id,
                    started_at: DateTime::from_timestamp(started_at, 0).unwrap_or_default(),
                },
            );
            id
        })
    }

    /// Record that a question was previewed
    pub fn add_preview(&self, question_id: i64) {
        self.with_state(|state| {
            let usage_id = state.next_id();
            state.usages.insert(
                usage_id,
                Usage {
                    component: PREVIEW_COMPONENT.to_owned(),
                    context_id: 1,
                },
            );
            let id = state.next_id();
            state.question_attempts.insert(
                id,
                QuestionAttemptRow {
                    usage_id,
                    question_id,
                },
            );
        });
    }

    /// Add a user
    pub fn add_user(&self, id: i64, username: &str, email: Option<&str>) {
        self.with_state(|state| {
            state.users.insert(
                id,
                User {
                    id,
                    username: username.to_owned(),
                    first_name: username.to_owned(),
                    last_name: String::new(),
                    email: email.map(ToOwned::to_owned),
                    deleted: false,
                },
            );
        });
    }

    /// Whether the question with the given ID exists
    #[must_use]
    pub fn has_question(&self, id: i64) -> bool {
        self.with_state(|state| state.questions.contains_key(&id))
    }

    /// Whether the category with the given ID exists
    #[must_use]
    pub fn has_category(&self, id: i64) -> bool {
        self.with_state(|state| state.categories.contains_key(&id))
    }

    /// Whether the quiz attempt with the given ID exists
    #[must_use]
    pub fn has_attempt(&self, id: i64) -> bool {
        self.with_state(|state| state.attempts.contains_key(&id))
    }

    /// The IDs of all the questions left, in increasing order
    #[must_use]
    pub fn question_ids(&self) -> Vec<i64> {
        self.with_state(|state| state.questions.keys().copied().collect())
    }

    /// The IDs of all the categories left, in increasing order
    #[must_use]
    pub fn category_ids(&self) -> Vec<i64> {
        self.with_state(|state| state.categories.keys().copied().collect())
    }

    /// How many jobs are in the queue
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.with_state(|state| state.jobs.len())
    }

    /// Whether the job with the given ID is reserved by a worker
    #[must_use]
    pub fn job_reserved(&self, id: i64) -> bool {
        self.with_state(|state| {
            state
                .jobs
                .get(&id)
                .is_some_and(|row| row.started_at.is_some())
        })
    }

    /// When the job with the given ID is due
    #[must_use]
    pub fn job_next_run(&self, id: i64) -> Option<DateTime<Utc>> {
        self.with_state(|state| state.jobs.get(&id).map(|row| row.next_run_at))
    }
}

/// A [`RepositoryFactory`] handing out repositories on a [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryRepositoryFactory {
    store: MemoryStore,
}

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let repo = MemoryRepository::new(self.store.clone());
        Ok(Box::new(MapErr::new(repo, RepositoryError::from_error)))
    }
}
