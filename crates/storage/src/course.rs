// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to look up courses and quizzes

use async_trait::async_trait;
use janitor_data_model::{Course, Quiz};

use crate::repository_impl;

/// A [`CourseRepository`] helps interacting with the courses and quizzes of
/// the LMS, which are only ever read.
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup a [`Course`] by its ID
    ///
    /// Returns `None` if no [`Course`] was found
    ///
    /// # Parameters
    ///
    /// * `id`: The ID of the [`Course`] to lookup
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, id: i64) -> Result<Option<Course>, Self::Error>;

    /// List all the courses, except the given site course, ordered by ID
    ///
    /// # Parameters
    ///
    /// * `site_course_id`: The ID of the site-level course to exclude
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_except(&mut self, site_course_id: i64) -> Result<Vec<Course>, Self::Error>;

    /// Find the ID of the context attached to a course
    ///
    /// Returns `None` if the course has no context
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn context_id(&mut self, course_id: i64) -> Result<Option<i64>, Self::Error>;

    /// Lookup a [`Quiz`] by its ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup_quiz(&mut self, id: i64) -> Result<Option<Quiz>, Self::Error>;
}

repository_impl!(CourseRepository:
    async fn lookup(&mut self, id: i64) -> Result<Option<Course>, Self::Error>;
    async fn list_except(&mut self, site_course_id: i64) -> Result<Vec<Course>, Self::Error>;
    async fn context_id(&mut self, course_id: i64) -> Result<Option<i64>, Self::Error>;
    async fn lookup_quiz(&mut self, id: i64) -> Result<Option<Quiz>, Self::Error>;
);
