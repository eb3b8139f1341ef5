// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`QuizAttemptRepository`].

use async_trait::async_trait;
use janitor_data_model::QuizAttempt;
use janitor_storage::{
    Pagination,
    attempt::{QuizAttemptFilter, QuizAttemptRepository},
};
use sqlx::PgConnection;

use crate::{DatabaseError, ExecuteExt, Tables, UnixTimestamp};

/// An implementation of [`QuizAttemptRepository`] for a PostgreSQL connection
pub struct PgQuizAttemptRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgQuizAttemptRepository<'c> {
    /// Create a new [`PgQuizAttemptRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct QuizAttemptLookup {
    id: i64,
    quiz: i64,
    userid: i64,
    uniqueid: i64,
    timestart: UnixTimestamp,
}

impl From<QuizAttemptLookup> for QuizAttempt {
    fn from(value: QuizAttemptLookup) -> Self {
        QuizAttempt {
            id: value.id,
            quiz_id: value.quiz,
            user_id: value.userid,
            usage_id: value.uniqueid,
            started_at: value.timestart.into(),
        }
    }
}

/// The conditions matching a [`QuizAttemptFilter`], binding the cutoff to
/// `$1`, the course to `$2` and the quiz to `$3`
const FILTER: &str = "
    qa.timestart < $1
    AND ($2::bigint IS NULL OR qz.course = $2)
    AND ($3::bigint IS NULL OR qa.quiz = $3)
";

fn cutoff(filter: &QuizAttemptFilter) -> i64 {
    filter.started_before().timestamp()
}

#[async_trait]
impl QuizAttemptRepository for PgQuizAttemptRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.quiz_attempt.count",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn count(&mut self, filter: QuizAttemptFilter) -> Result<usize, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT COUNT(*) FROM {{quiz_attempts}} qa
             JOIN {{quiz}} qz ON qz.id = qa.quiz
             WHERE {FILTER}"
        ));
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(cutoff(&filter))
            .bind(filter.course_id())
            .bind(filter.quiz_id())
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        crate::count(count)
    }

    #[tracing::instrument(
        name = "db.quiz_attempt.list",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn list(
        &mut self,
        filter: QuizAttemptFilter,
        pagination: Pagination,
    ) -> Result<Vec<QuizAttempt>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT qa.id, qa.quiz, qa.userid, qa.uniqueid, qa.timestart
             FROM {{quiz_attempts}} qa
             JOIN {{quiz}} qz ON qz.id = qa.quiz
             WHERE {FILTER}
               AND ($4::bigint IS NULL OR qa.id > $4)
             ORDER BY qa.id
             LIMIT $5"
        ));
        let res: Vec<QuizAttemptLookup> = sqlx::query_as(&sql)
            .bind(cutoff(&filter))
            .bind(filter.course_id())
            .bind(filter.quiz_id())
            .bind(pagination.after)
            .bind(i64::try_from(pagination.count).unwrap_or(i64::MAX))
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.quiz_attempt.delete",
        skip_all,
        fields(
            quiz_attempt.id = attempt.id,
            quiz_attempt.usage_id = attempt.usage_id,
        ),
        err,
    )]
    async fn delete(&mut self, attempt: &QuizAttempt) -> Result<(), Self::Error> {
        let steps = [
            (
                "deleting question attempt step data",
                "DELETE FROM {question_attempt_step_data} WHERE attemptstepid IN (
                    SELECT s.id FROM {question_attempt_steps} s
                    JOIN {question_attempts} qa ON qa.id = s.questionattemptid
                    WHERE qa.questionusageid = $1
                )",
            ),
            (
                "deleting question attempt steps",
                "DELETE FROM {question_attempt_steps} WHERE questionattemptid IN (
                    SELECT id FROM {question_attempts} WHERE questionusageid = $1
                )",
            ),
            (
                "deleting question attempts",
                "DELETE FROM {question_attempts} WHERE questionusageid = $1",
            ),
            (
                "deleting question usage",
                "DELETE FROM {question_usages} WHERE id = $1",
            ),
        ];

        for (context, statement) in steps {
            let sql = self.tables.sql(statement);
            sqlx::query(&sql)
                .bind(attempt.usage_id)
                .execute(&mut *self.conn)
                .await
                .map_err(DatabaseError::step(context))?;
        }

        let sql = self.tables.sql("DELETE FROM {quiz_attempts} WHERE id = $1");
        let res = sqlx::query(&sql)
            .bind(attempt.id)
            .execute(&mut *self.conn)
            .await
            .map_err(DatabaseError::step("deleting quiz attempt"))?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}
