// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`QuestionCategoryRepository`].

use async_trait::async_trait;
use janitor_data_model::QuestionCategory;
use janitor_storage::{DuplicateGroup, category::QuestionCategoryRepository};
use sqlx::PgConnection;

use crate::{DatabaseError, ExecuteExt, Tables};

/// An implementation of [`QuestionCategoryRepository`] for a PostgreSQL
/// connection
pub struct PgQuestionCategoryRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgQuestionCategoryRepository<'c> {
    /// Create a new [`PgQuestionCategoryRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryLookup {
    id: i64,
    name: String,
    contextid: i64,
    parent: i64,
    stamp: String,
}

impl From<CategoryLookup> for QuestionCategory {
    fn from(value: CategoryLookup) -> Self {
        QuestionCategory {
            id: value.id,
            name: value.name,
            context_id: value.contextid,
            parent_id: value.parent,
            stamp: value.stamp,
        }
    }
}

#[async_trait]
impl QuestionCategoryRepository for PgQuestionCategoryRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.question_category.lookup",
        skip_all,
        fields(
            question_category.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn lookup(&mut self, id: i64) -> Result<Option<QuestionCategory>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT id, name, contextid, parent, stamp FROM {question_categories} WHERE id = $1",
        );
        let res: Option<CategoryLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.question_category.duplicate_names",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn duplicate_names(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<DuplicateGroup>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT name, contextid, COUNT(*) FROM {question_categories}
             WHERE $1::bigint IS NULL OR contextid = $1
             GROUP BY contextid, name
             HAVING COUNT(*) > 1
             ORDER BY contextid, name",
        );
        let res: Vec<(String, i64, i64)> = sqlx::query_as(&sql)
            .bind(context_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        res.into_iter()
            .map(|(name, context_id, count)| -> Result<_, DatabaseError> {
                Ok(DuplicateGroup {
                    name,
                    context_id,
                    count: crate::count(count)?,
                })
            })
            .collect()
    }

    #[tracing::instrument(
        name = "db.question_category.list_by_name",
        skip_all,
        fields(
            context.id = context_id,
            question_category.name = name,
            db.query.text,
        ),
        err,
    )]
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<QuestionCategory>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT id, name, contextid, parent, stamp FROM {question_categories}
             WHERE contextid = $1 AND name = $2
             ORDER BY stamp, id",
        );
        let res: Vec<CategoryLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .bind(name)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question_category.list",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn list(
        &mut self,
        context_id: Option<i64>,
    ) -> Result<Vec<QuestionCategory>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT id, name, contextid, parent, stamp FROM {question_categories}
             WHERE $1::bigint IS NULL OR contextid = $1
             ORDER BY id",
        );
        let res: Vec<CategoryLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question_category.count_questions",
        skip_all,
        fields(
            question_category.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn count_questions(&mut self, id: i64) -> Result<usize, Self::Error> {
        let sql = self.tables.sql(
            "SELECT COUNT(q.id) FROM {question_bank_entries} qbe
             JOIN {question_versions} qv ON qv.questionbankentryid = qbe.id
             JOIN {question} q ON q.id = qv.questionid
             WHERE qbe.questioncategoryid = $1",
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        crate::count(count)
    }

    #[tracing::instrument(
        name = "db.question_category.count_children",
        skip_all,
        fields(
            question_category.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn count_children(&mut self, id: i64) -> Result<usize, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT COUNT(*) FROM {question_categories} WHERE parent = $1");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        crate::count(count)
    }

    #[tracing::instrument(
        name = "db.question_category.delete",
        skip_all,
        fields(
            question_category.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error> {
        // There are no foreign keys on the parent column
        let sql = self.tables.sql(
            "DELETE FROM {question_categories} qc
             WHERE qc.id = $1
               AND NOT EXISTS (
                 SELECT 1 FROM {question_categories} child WHERE child.parent = qc.id
               )",
        );
        let res = sqlx::query(&sql)
            .bind(id)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}
