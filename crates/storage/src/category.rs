// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with question categories

use async_trait::async_trait;
use janitor_data_model::QuestionCategory;

use crate::{question::DuplicateGroup, repository_impl};

/// A [`QuestionCategoryRepository`] helps interacting with
/// [`QuestionCategory`]s
#[async_trait]
pub trait QuestionCategoryRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup a [`QuestionCategory`] by its ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, id: i64) -> Result<Option<QuestionCategory>, Self::Error>;

    /// Find the names shared by more than one category in the same context.
    ///
    /// If `context_id` is `None`, every context is considered, and each group
    /// is made of the categories with the same name in the same context.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn duplicate_names(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<DuplicateGroup>, Self::Error>;

    /// List the categories with the given name in a context, oldest first.
    ///
    /// The age of a category is given by its stamp, then by its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<QuestionCategory>, Self::Error>;

    /// List all the categories, ordered by ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list(&mut self, context_id: Option<i64>)
    -> Result<Vec<QuestionCategory>, Self::Error>;

    /// Count the questions attached to a category through their bank entry
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_questions(&mut self, id: i64) -> Result<usize, Self::Error>;

    /// Count the categories which have the given category as parent
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_children(&mut self, id: i64) -> Result<usize, Self::Error>;

    /// Delete a category.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// category gained children in the meantime
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error>;
}

repository_impl!(QuestionCategoryRepository:
    async fn lookup(&mut self, id: i64) -> Result<Option<QuestionCategory>, Self::Error>;
    async fn duplicate_names(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<DuplicateGroup>, Self::Error>;
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<QuestionCategory>, Self::Error>;
    async fn list(&mut self, context_id: Option<i64>)
    -> Result<Vec<QuestionCategory>, Self::Error>;
    async fn count_questions(&mut self, id: i64) -> Result<usize, Self::Error>;
    async fn count_children(&mut self, id: i64) -> Result<usize, Self::Error>;
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error>;
);
