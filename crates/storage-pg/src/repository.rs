// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use janitor_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction, attempt::QuizAttemptRepository,
    category::QuestionCategoryRepository, course::CourseRepository,
    qtype::QuestionTypeRepository, question::QuestionRepository, queue::QueueJobRepository,
    user::UserRepository,
};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::Instrument;

use crate::{
    DatabaseError, Tables, attempt::PgQuizAttemptRepository,
    category::PgQuestionCategoryRepository, course::PgCourseRepository,
    qtype::PgQuestionTypeRepository, question::PgQuestionRepository,
    queue::PgQueueJobRepository, user::PgUserRepository,
};

/// An implementation of the [`RepositoryFactory`] trait backed by a PostgreSQL
/// connection pool.
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: PgPool,
    tables: Tables,
}

impl PgRepositoryFactory {
    /// Create a new [`PgRepositoryFactory`] from a PostgreSQL connection pool,
    /// using the given table prefix
    #[must_use]
    pub fn new(pool: PgPool, tables: Tables) -> Self {
        Self { pool, tables }
    }

    /// Box the factory
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }

    /// Get the underlying PostgreSQL connection pool
    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

#[async_trait]
impl RepositoryFactory for PgRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let repo = PgRepository::from_pool(&self.pool, self.tables.clone())
            .await
            .map_err(RepositoryError::from_error)?
            .boxed();

        Ok(repo)
    }
}

/// An implementation of the [`Repository`] trait backed by a PostgreSQL
/// transaction.
pub struct PgRepository<C = Transaction<'static, Postgres>> {
    conn: C,
    tables: Tables,
}

impl PgRepository {
    /// Create a new [`PgRepository`] from a PostgreSQL connection pool,
    /// starting a transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if the transaction could not be started.
    pub async fn from_pool(pool: &PgPool, tables: Tables) -> Result<Self, DatabaseError> {
        let txn = pool.begin().await?;
        Ok(Self::from_conn(txn, tables))
    }

    /// Transform the repository into a type-erased [`BoxRepository`]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl<C> PgRepository<C> {
    /// Create a new [`PgRepository`] from an existing PostgreSQL connection
    /// with a transaction
    pub fn from_conn(conn: C, tables: Tables) -> Self {
        PgRepository { conn, tables }
    }

    /// Consume this [`PgRepository`], returning the underlying connection.
    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> Deref for PgRepository<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C> DerefMut for PgRepository<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Repository<DatabaseError> for PgRepository {}

impl RepositoryTransaction for PgRepository {
    type Error = DatabaseError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let span = tracing::info_span!("db.save");
        self.conn
            .commit()
            .map_err(DatabaseError::from)
            .instrument(span)
            .boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let span = tracing::info_span!("db.cancel");
        self.conn
            .rollback()
            .map_err(DatabaseError::from)
            .instrument(span)
            .boxed()
    }
}

impl<C> RepositoryAccess for PgRepository<C>
where
    C: AsMut<PgConnection> + Send,
{
    type Error = DatabaseError;

    fn course<'c>(&'c mut self) -> Box<dyn CourseRepository<Error = Self::Error> + 'c> {
        Box::new(PgCourseRepository::new(self.conn.as_mut(), &self.tables))
    }

    fn quiz_attempt<'c>(
        &'c mut self,
    ) -> Box<dyn QuizAttemptRepository<Error = Self::Error> + 'c> {
        Box::new(PgQuizAttemptRepository::new(self.conn.as_mut(), &self.tables))
    }

    fn question<'c>(&'c mut self) -> Box<dyn QuestionRepository<Error = Self::Error> + 'c> {
        Box::new(PgQuestionRepository::new(self.conn.as_mut(), &self.tables))
    }

    fn question_category<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionCategoryRepository<Error = Self::Error> + 'c> {
        Box::new(PgQuestionCategoryRepository::new(
            self.conn.as_mut(),
            &self.tables,
        ))
    }

    fn question_type<'c>(
        &'c mut self,
    ) -> Box<dyn QuestionTypeRepository<Error = Self::Error> + 'c> {
        Box::new(PgQuestionTypeRepository::new(self.conn.as_mut(), &self.tables))
    }

    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
        Box::new(PgUserRepository::new(self.conn.as_mut(), &self.tables))
    }

    fn queue_job<'c>(&'c mut self) -> Box<dyn QueueJobRepository<Error = Self::Error> + 'c> {
        Box::new(PgQueueJobRepository::new(self.conn.as_mut(), &self.tables))
    }
}
