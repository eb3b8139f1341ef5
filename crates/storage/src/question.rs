// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with the questions of the question bank

use async_trait::async_trait;
use janitor_data_model::{Question, QuestionStatistics, QuestionStatus, QuestionUsageInfo};

use crate::{Pagination, qtype::SatelliteTable, repository_impl};

/// A set of rows sharing the same name in the same context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// The shared name
    pub name: String,

    /// The context all the rows belong to
    pub context_id: i64,

    /// How many rows share that name
    pub count: usize,
}

impl DuplicateGroup {
    /// How many rows of this group have to go for only one to remain
    #[must_use]
    pub fn surplus(&self) -> usize {
        self.count.saturating_sub(1)
    }
}

/// A [`QuestionRepository`] helps interacting with [`Question`]s, their
/// versions and the usages referencing them.
///
/// Questions are scoped to a context through the category of their question
/// bank entry. Methods taking an optional `context_id` look at the whole site
/// when it is `None`.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup a [`Question`] by its ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, id: i64) -> Result<Option<Question>, Self::Error>;

    /// Check whether a [`Question`] with the given ID still exists
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn exists(&mut self, id: i64) -> Result<bool, Self::Error>;

    /// Count the unused hidden questions.
    ///
    /// A question is unused when its version is hidden, no attempt outside of
    /// a preview references it, and no question reference pins that version.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_unused(&mut self, context_id: Option<i64>) -> Result<usize, Self::Error>;

    /// List a page of unused hidden questions, ordered by ID
    ///
    /// See [`QuestionRepository::count_unused`] for the exact condition.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_unused(
        &mut self,
        context_id: Option<i64>,
        pagination: Pagination,
    ) -> Result<Vec<Question>, Self::Error>;

    /// Find the names shared by more than one question in a context
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn duplicate_names(&mut self, context_id: i64)
    -> Result<Vec<DuplicateGroup>, Self::Error>;

    /// List the questions with the given name in a context, oldest first.
    /// Questions created at the same time are ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<Question>, Self::Error>;

    /// Find where a question is used, ignoring previews
    ///
    /// Returns `None` if the question was never attempted outside of a preview
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_usage(&mut self, id: i64) -> Result<Option<QuestionUsageInfo>, Self::Error>;

    /// Delete a question, with its version, its answers, hints and type
    /// specific options, and its bank entry if no other version remains.
    ///
    /// This does nothing if the question is still used by an attempt outside
    /// of a preview. Callers should check with [`QuestionRepository::exists`]
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error>;

    /// List the questions of the given type which have no row in the type's
    /// options table
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_missing_options(
        &mut self,
        context_id: Option<i64>,
        qtype: &str,
        table: SatelliteTable,
    ) -> Result<Vec<Question>, Self::Error>;

    /// List the questions of the given types which have no answer at all
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_without_answers(
        &mut self,
        context_id: Option<i64>,
        qtypes: &[&str],
    ) -> Result<Vec<Question>, Self::Error>;

    /// Compute the question bank statistics of a context
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn statistics(&mut self, context_id: i64) -> Result<QuestionStatistics, Self::Error>;

    /// Count the questions of a context by question type
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_by_qtype(&mut self, context_id: i64)
    -> Result<Vec<(String, usize)>, Self::Error>;

    /// Count the questions of a context by version status
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_by_status(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(QuestionStatus, usize)>, Self::Error>;
}

repository_impl!(QuestionRepository:
    async fn lookup(&mut self, id: i64) -> Result<Option<Question>, Self::Error>;
    async fn exists(&mut self, id: i64) -> Result<bool, Self::Error>;
    async fn count_unused(&mut self, context_id: Option<i64>) -> Result<usize, Self::Error>;
    async fn list_unused(
        &mut self,
        context_id: Option<i64>,
        pagination: Pagination,
    ) -> Result<Vec<Question>, Self::Error>;
    async fn duplicate_names(&mut self, context_id: i64)
    -> Result<Vec<DuplicateGroup>, Self::Error>;
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<Question>, Self::Error>;
    async fn find_usage(&mut self, id: i64) -> Result<Option<QuestionUsageInfo>, Self::Error>;
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error>;
    async fn list_missing_options(
        &mut self,
        context_id: Option<i64>,
        qtype: &str,
        table: SatelliteTable,
    ) -> Result<Vec<Question>, Self::Error>;
    async fn list_without_answers(
        &mut self,
        context_id: Option<i64>,
        qtypes: &[&str],
    ) -> Result<Vec<Question>, Self::Error>;
    async fn statistics(&mut self, context_id: i64) -> Result<QuestionStatistics, Self::Error>;
    async fn count_by_qtype(&mut self, context_id: i64)
    -> Result<Vec<(String, usize)>, Self::Error>;
    async fn count_by_status(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(QuestionStatus, usize)>, Self::Error>;
);
