// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::{
    attempt::QuizAttemptRepository, category::QuestionCategoryRepository,
    course::CourseRepository, qtype::QuestionTypeRepository, question::QuestionRepository,
    queue::QueueJobRepository, user::UserRepository,
};

/// A [`RepositoryFactory`] is a factory that can create a [`BoxRepository`].
///
/// Every repository it creates runs in its own transaction.
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Create a new [`BoxRepository`]
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + Send + Sync + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
}

/// A type-erased [`Repository`]
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + Sync + 'static>;

/// An opaque, type-erased error
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RepositoryError {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] from any error kind
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(value),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::from_error(value)
    }
}

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`] functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit the
    /// transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
///
/// All the methods return a boxed trait object, which can be used to access a
/// particular repository. The lifetime of the returned object is bound to the
/// lifetime of the whole repository, so that only one mutable reference to the
/// repository is used at a time.
///
/// When adding a new repository, you should add a new method to this trait, and
/// update the implementations for [`crate::MapErr`] and [`Box<R>`] below.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`CourseRepository`]
    fn course<'c>(&'c mut self) -> Box<dyn CourseRepository<Error = Self::Error> + 'c>;

    /// Get a [`QuizAttemptRepository`]
    fn quiz_attempt<'c>(&'c mut self)
    -> Box<dyn QuizAttemptRepository<Error = Self::Error> + 'c>;

    /// Get a [`QuestionRepository`]
    fn question<'c>(&'c mut self) -> Box<dyn QuestionRepository<Error = Self::Error> + 'c>;

    /// Get a [`QuestionCategoryRepository`]
    fn question_category<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionCategoryRepository<Error = Self::Error> + 'c>;

    /// Get a [`QuestionTypeRepository`]
    fn question_type<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionTypeRepository<Error = Self::Error> + 'c>;

    /// Get an [`UserRepository`]
    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c>;

    /// Get a [`QueueJobRepository`]
    fn queue_job<'c>(&'c mut self) -> Box<dyn QueueJobRepository<Error = Self::Error> + 'c>;
}

/// Implementations of the [`RepositoryAccess`], [`RepositoryTransaction`] and
/// [`Repository`] for the [`crate::MapErr`] wrapper and [`Box<R>`]
mod impls {
    use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};

    use super::RepositoryAccess;
    use crate::{
        MapErr, Repository, RepositoryTransaction,
        attempt::QuizAttemptRepository,
        category::QuestionCategoryRepository,
        course::CourseRepository,
        qtype::QuestionTypeRepository,
        question::QuestionRepository,
        queue::QueueJobRepository,
        user::UserRepository,
    };

    // --- Repository ---
    impl<R, F, E1, E2> Repository<E2> for MapErr<R, F>
    where
        R: Repository<E1> + RepositoryAccess<Error = E1> + RepositoryTransaction<Error = E1>,
        F: FnMut(E1) -> E2 + Send + Sync + 'static,
        E1: std::error::Error + Send + Sync + 'static,
        E2: std::error::Error + Send + Sync + 'static,
    {
    }

    // --- RepositoryTransaction --
    impl<R, F, E> RepositoryTransaction for MapErr<R, F>
    where
        R: RepositoryTransaction,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error,
    {
        type Error = E;

        fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).save().map_err(self.mapper).boxed()
        }

        fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).cancel().map_err(self.mapper).boxed()
        }
    }

    // --- RepositoryAccess --
    impl<R, F, E> RepositoryAccess for MapErr<R, F>
    where
        R: RepositoryAccess,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        type Error = E;

        fn course<'c>(&'c mut self) -> Box<dyn CourseRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.course(), &mut self.mapper))
        }

        fn quiz_attempt<'c>(
            &'c mut self,
        ) -> Box<dyn QuizAttemptRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.quiz_attempt(), &mut self.mapper))
        }

        fn question<'c>(&'c mut self) -> Box<dyn QuestionRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.question(), &mut self.mapper))
        }

        fn question_category<'c>(
            &'c mut self,
        ) -> Box<dyn QuestionCategoryRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.question_category(), &mut self.mapper))
        }

        fn question_type<'c>(
            &'c mut self,
        ) -> Box<dyn QuestionTypeRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.question_type(), &mut self.mapper))
        }

        fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.user(), &mut self.mapper))
        }

        fn queue_job<'c>(&'c mut self) -> Box<dyn QueueJobRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.queue_job(), &mut self.mapper))
        }
    }

    impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
        type Error = R::Error;

        fn course<'c>(&'c mut self) -> Box<dyn CourseRepository<Error = Self::Error> + 'c> {
            (**self).course()
        }

        fn quiz_attempt<'c>(
            &'c mut self,
        ) -> Box<dyn QuizAttemptRepository<Error = Self::Error> + 'c> {
            (**self).quiz_attempt()
        }

        fn question<'c>(&'c mut self) -> Box<dyn QuestionRepository<Error = Self::Error> + 'c> {
            (**self).question()
        }

        fn question_category<'c>(
            &'c mut self,
        ) -> Box<dyn QuestionCategoryRepository<Error = Self::Error> + 'c> {
            (**self).question_category()
        }

        fn question_type<'c>(
            &'c mut self,
        ) -> Box<dyn QuestionTypeRepository<Error = Self::Error> + 'c> {
            (**self).question_type()
        }

        fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
            (**self).user()
        }

        fn queue_job<'c>(&'c mut self) -> Box<dyn QueueJobRepository<Error = Self::Error> + 'c> {
            (**self).queue_job()
        }
    }
}
