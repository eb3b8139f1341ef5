// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with quiz attempts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use janitor_data_model::QuizAttempt;

use crate::{Pagination, repository_impl};

/// Filter parameters for listing quiz attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizAttemptFilter {
    started_before: DateTime<Utc>,
    course_id: Option<i64>,
    quiz_id: Option<i64>,
}

impl QuizAttemptFilter {
    /// Create a new [`QuizAttemptFilter`] matching attempts started strictly
    /// before the given cutoff
    #[must_use]
    pub fn new(started_before: DateTime<Utc>) -> Self {
        Self {
            started_before,
            course_id: None,
            quiz_id: None,
        }
    }

    /// Only match attempts on quizzes of the given course
    #[must_use]
    pub fn for_course(mut self, course_id: i64) -> Self {
        self.course_id = Some(course_id);
        self
    }

    /// Only match attempts on the given quiz
    #[must_use]
    pub fn for_quiz(mut self, quiz_id: i64) -> Self {
        self.quiz_id = Some(quiz_id);
        self
    }

    /// Get the cutoff of the filter
    #[must_use]
    pub fn started_before(&self) -> DateTime<Utc> {
        self.started_before
    }

    /// Get the course filter
    #[must_use]
    pub fn course_id(&self) -> Option<i64> {
        self.course_id
    }

    /// Get the quiz filter
    #[must_use]
    pub fn quiz_id(&self) -> Option<i64> {
        self.quiz_id
    }
}

/// A [`QuizAttemptRepository`] helps interacting with the attempts learners
/// made on quizzes
#[async_trait]
pub trait QuizAttemptRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Count the [`QuizAttempt`]s matching the given filter
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count(&mut self, filter: QuizAttemptFilter) -> Result<usize, Self::Error>;

    /// List a page of [`QuizAttempt`]s matching the given filter, ordered by
    /// ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list(
        &mut self,
        filter: QuizAttemptFilter,
        pagination: Pagination,
    ) -> Result<Vec<QuizAttempt>, Self::Error>;

    /// Delete a [`QuizAttempt`], along with its question usage and all the
    /// question attempts and steps in it
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn delete(&mut self, attempt: &QuizAttempt) -> Result<(), Self::Error>;
}

repository_impl!(QuizAttemptRepository:
    async fn count(&mut self, filter: QuizAttemptFilter) -> Result<usize, Self::Error>;
    async fn list(
        &mut self,
        filter: QuizAttemptFilter,
        pagination: Pagination,
    ) -> Result<Vec<QuizAttempt>, Self::Error>;
    async fn delete(&mut self, attempt: &QuizAttempt) -> Result<(), Self::Error>;
);
