// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`QuestionRepository`].

use async_trait::async_trait;
use janitor_data_model::{Question, QuestionStatistics, QuestionStatus, QuestionUsageInfo};
use janitor_storage::{
    DuplicateGroup, Pagination,
    qtype::{SatelliteTable, options_table},
    question::QuestionRepository,
};
use sqlx::PgConnection;

use crate::{DatabaseError, DatabaseInconsistencyError, ExecuteExt, Tables, UnixTimestamp};

/// An implementation of [`QuestionRepository`] for a PostgreSQL connection
pub struct PgQuestionRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgQuestionRepository<'c> {
    /// Create a new [`PgQuestionRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct QuestionLookup {
    id: i64,
    name: String,
    qtype: String,
    timecreated: UnixTimestamp,
    category_id: i64,
}

impl From<QuestionLookup> for Question {
    fn from(value: QuestionLookup) -> Self {
        Question {
            id: value.id,
            name: value.name,
            qtype: value.qtype,
            created_at: value.timecreated.into(),
            category_id: value.category_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UsageLookup {
    component: String,
    contextid: i64,
    course: Option<i64>,
    cmid: Option<i64>,
    activity: Option<String>,
}

impl From<UsageLookup> for QuestionUsageInfo {
    fn from(value: UsageLookup) -> Self {
        QuestionUsageInfo {
            component: value.component,
            context_id: value.contextid,
            course_id: value.course,
            course_module_id: value.cmid,
            activity: value.activity,
        }
    }
}

/// Questions with their current version, bank entry and category
const QUESTIONS: &str = "
    SELECT q.id, q.name, q.qtype, q.timecreated, qbe.questioncategoryid AS category_id
    FROM {question} q
    JOIN {question_versions} qv ON qv.questionid = q.id
    JOIN {question_bank_entries} qbe ON qbe.id = qv.questionbankentryid
    JOIN {question_categories} qc ON qc.id = qbe.questioncategoryid
";

/// The same joins as [`QUESTIONS`], without the columns
const QUESTIONS_FROM: &str = "
    FROM {question} q
    JOIN {question_versions} qv ON qv.questionid = q.id
    JOIN {question_bank_entries} qbe ON qbe.id = qv.questionbankentryid
    JOIN {question_categories} qc ON qc.id = qbe.questioncategoryid
";

/// Whether `q` was attempted outside of a preview
const IS_USED: &str = "
    EXISTS (
        SELECT 1 FROM {question_attempts} qatt
        JOIN {question_usages} qu ON qu.id = qatt.questionusageid
        WHERE qatt.questionid = q.id
          AND qu.component <> 'core_question_preview'
    )
";

/// Whether a reference pins the version `qv`, either explicitly or by
/// following the latest version of the bank entry
const IS_PINNED: &str = "
    EXISTS (
        SELECT 1 FROM {question_references} qr
        WHERE qr.questionbankentryid = qv.questionbankentryid
          AND (
            qr.version = qv.version
            OR (
                qr.version IS NULL
                AND qv.version = (
                    SELECT MAX(v.version) FROM {question_versions} v
                    WHERE v.questionbankentryid = qv.questionbankentryid
                )
            )
          )
    )
";

/// Unused hidden questions, optionally in the context bound to `$1`
fn unused_condition() -> String {
    format!(
        "qv.status = 'hidden'
         AND ($1::bigint IS NULL OR qc.contextid = $1)
         AND NOT {IS_USED}
         AND NOT {IS_PINNED}"
    )
}

/// Whether the category `qc` has no question attached
const CATEGORY_IS_EMPTY: &str = "
    NOT EXISTS (
        SELECT 1 FROM {question_bank_entries} e
        JOIN {question_versions} v ON v.questionbankentryid = e.id
        WHERE e.questioncategoryid = qc.id
    )
";

impl PgQuestionRepository<'_> {
    async fn count_statistic(
        &mut self,
        statement: &str,
        context_id: i64,
    ) -> Result<u64, DatabaseError> {
        let sql = self.tables.sql(statement);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(context_id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        u64::try_from(count).map_err(DatabaseError::invalid_operation)
    }

    async fn execute_step(
        &mut self,
        context: &'static str,
        statement: &str,
        id: i64,
    ) -> Result<u64, DatabaseError> {
        let sql = self.tables.sql(statement);
        let res = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(DatabaseError::step(context))?;

        Ok(res.rows_affected())
    }

    async fn options_table_exists(
        &mut self,
        table: SatelliteTable,
    ) -> Result<bool, DatabaseError> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.tables.name(table.name))
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl QuestionRepository for PgQuestionRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.question.lookup",
        skip_all,
        fields(
            question.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn lookup(&mut self, id: i64) -> Result<Option<Question>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT q.id, q.name, q.qtype, q.timecreated,
                    COALESCE(qbe.questioncategoryid, 0) AS category_id
             FROM {question} q
             LEFT JOIN {question_versions} qv ON qv.questionid = q.id
             LEFT JOIN {question_bank_entries} qbe ON qbe.id = qv.questionbankentryid
             WHERE q.id = $1",
        );
        let res: Option<QuestionLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.question.exists",
        skip_all,
        fields(
            question.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn exists(&mut self, id: i64) -> Result<bool, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT EXISTS (SELECT 1 FROM {question} WHERE id = $1)");
        let exists = sqlx::query_scalar(&sql)
            .bind(id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        Ok(exists)
    }

    #[tracing::instrument(
        name = "db.question.count_unused",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn count_unused(&mut self, context_id: Option<i64>) -> Result<usize, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT COUNT(*) {QUESTIONS_FROM} WHERE {}",
            unused_condition()
        ));
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(context_id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        crate::count(count)
    }

    #[tracing::instrument(
        name = "db.question.list_unused",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn list_unused(
        &mut self,
        context_id: Option<i64>,
        pagination: Pagination,
    ) -> Result<Vec<Question>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "{QUESTIONS}
             WHERE {}
               AND ($2::bigint IS NULL OR q.id > $2)
             ORDER BY q.id
             LIMIT $3",
            unused_condition()
        ));
        let res: Vec<QuestionLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .bind(pagination.after)
            .bind(i64::try_from(pagination.count).unwrap_or(i64::MAX))
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question.duplicate_names",
        skip_all,
        fields(
            context.id = context_id,
            db.query.text,
        ),
        err,
    )]
    async fn duplicate_names(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<DuplicateGroup>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT q.name, COUNT(*) {QUESTIONS_FROM}
             WHERE qc.contextid = $1
             GROUP BY q.name
             HAVING COUNT(*) > 1
             ORDER BY q.name"
        ));
        let res: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(context_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        res.into_iter()
            .map(|(name, count)| -> Result<_, DatabaseError> {
                Ok(DuplicateGroup {
                    name,
                    context_id,
                    count: crate::count(count)?,
                })
            })
            .collect()
    }

    #[tracing::instrument(
        name = "db.question.list_by_name",
        skip_all,
        fields(
            context.id = context_id,
            question.name = name,
            db.query.text,
        ),
        err,
    )]
    async fn list_by_name(
        &mut self,
        context_id: i64,
        name: &str,
    ) -> Result<Vec<Question>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "{QUESTIONS}
             WHERE qc.contextid = $1 AND q.name = $2
             ORDER BY q.timecreated, q.id"
        ));
        let res: Vec<QuestionLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .bind(name)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question.find_usage",
        skip_all,
        fields(
            question.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn find_usage(&mut self, id: i64) -> Result<Option<QuestionUsageInfo>, Self::Error> {
        // Usages of activities live in the context of their course module
        let sql = self.tables.sql(
            "SELECT qu.component, qu.contextid, cm.course, cm.id AS cmid, qz.name AS activity
             FROM {question_attempts} qatt
             JOIN {question_usages} qu ON qu.id = qatt.questionusageid
             LEFT JOIN {context} ctx ON ctx.id = qu.contextid AND ctx.contextlevel = 70
             LEFT JOIN {course_modules} cm ON cm.id = ctx.instanceid
             LEFT JOIN {modules} m ON m.id = cm.module
             LEFT JOIN {quiz} qz ON m.name = 'quiz' AND qz.id = cm.instance
             WHERE qatt.questionid = $1
               AND qu.component <> 'core_question_preview'
             ORDER BY qatt.id
             LIMIT 1",
        );
        let res: Option<UsageLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.question.delete",
        skip_all,
        fields(
            question.id = id,
            question.qtype,
        ),
        err,
    )]
    async fn delete(&mut self, id: i64) -> Result<(), Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT q.qtype, {IS_USED} OR {IS_PINNED} AS in_use
             FROM {{question}} q
             LEFT JOIN {{question_versions}} qv ON qv.questionid = q.id
             WHERE q.id = $1"
        ));
        let res: Option<(String, bool)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        let Some((qtype, in_use)) = res else {
            return Ok(());
        };
        tracing::Span::current().record("question.qtype", qtype.as_str());

        if in_use {
            tracing::debug!("Question is still in use, not deleting it");
            return Ok(());
        }

        // Only preview attempts are left at this point
        self.execute_step(
            "deleting preview step data",
            "DELETE FROM {question_attempt_step_data} WHERE attemptstepid IN (
                SELECT s.id FROM {question_attempt_steps} s
                JOIN {question_attempts} qatt ON qatt.id = s.questionattemptid
                WHERE qatt.questionid = $1
            )",
            id,
        )
        .await?;
        self.execute_step(
            "deleting preview steps",
            "DELETE FROM {question_attempt_steps} WHERE questionattemptid IN (
                SELECT id FROM {question_attempts} WHERE questionid = $1
            )",
            id,
        )
        .await?;
        self.execute_step(
            "deleting preview attempts",
            "DELETE FROM {question_attempts} WHERE questionid = $1",
            id,
        )
        .await?;

        self.execute_step(
            "deleting answers",
            "DELETE FROM {question_answers} WHERE question = $1",
            id,
        )
        .await?;
        self.execute_step(
            "deleting hints",
            "DELETE FROM {question_hints} WHERE questionid = $1",
            id,
        )
        .await?;

        if let Some(table) = options_table(&qtype) {
            if self.options_table_exists(table).await? {
                let statement = format!(
                    "DELETE FROM {{{}}} WHERE {} = $1",
                    table.name, table.question_column
                );
                self.execute_step("deleting type options", &statement, id)
                    .await?;
            }
        }

        let sql = self.tables.sql(
            "DELETE FROM {question_versions} WHERE questionid = $1 RETURNING questionbankentryid",
        );
        let entries: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(DatabaseError::step("deleting question version"))?;

        let deleted = self
            .execute_step(
                "deleting question",
                "DELETE FROM {question} WHERE id = $1",
                id,
            )
            .await?;
        if deleted != 1 {
            return Err(DatabaseError::RowsAffected {
                expected: 1,
                actual: deleted,
            });
        }

        for entry_id in entries {
            self.execute_step(
                "deleting question references",
                "DELETE FROM {question_references} WHERE questionbankentryid = $1
                 AND NOT EXISTS (
                    SELECT 1 FROM {question_versions} WHERE questionbankentryid = $1
                 )",
                entry_id,
            )
            .await?;
            self.execute_step(
                "deleting question bank entry",
                "DELETE FROM {question_bank_entries} WHERE id = $1
                 AND NOT EXISTS (
                    SELECT 1 FROM {question_versions} WHERE questionbankentryid = $1
                 )",
                entry_id,
            )
            .await?;
        }

        Ok(())
    }

    #[tracing::instrument(
        name = "db.question.list_missing_options",
        skip_all,
        fields(
            question.qtype = qtype,
            db.query.text,
        ),
        err,
    )]
    async fn list_missing_options(
        &mut self,
        context_id: Option<i64>,
        qtype: &str,
        table: SatelliteTable,
    ) -> Result<Vec<Question>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "{QUESTIONS}
             WHERE q.qtype = $2
               AND ($1::bigint IS NULL OR qc.contextid = $1)
               AND NOT EXISTS (SELECT 1 FROM {{{table}}} o WHERE o.{column} = q.id)
             ORDER BY q.id",
            table = table.name,
            column = table.question_column,
        ));
        let res: Vec<QuestionLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .bind(qtype)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question.list_without_answers",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn list_without_answers(
        &mut self,
        context_id: Option<i64>,
        qtypes: &[&str],
    ) -> Result<Vec<Question>, Self::Error> {
        let qtypes: Vec<String> = qtypes.iter().map(|qtype| (*qtype).to_owned()).collect();
        let sql = self.tables.sql(&format!(
            "{QUESTIONS}
             WHERE q.qtype = ANY($2)
               AND ($1::bigint IS NULL OR qc.contextid = $1)
               AND NOT EXISTS (SELECT 1 FROM {{question_answers}} a WHERE a.question = q.id)
             ORDER BY q.id"
        ));
        let res: Vec<QuestionLookup> = sqlx::query_as(&sql)
            .bind(context_id)
            .bind(qtypes)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.question.statistics",
        skip_all,
        fields(
            context.id = context_id,
            db.query.text,
        ),
        err,
    )]
    async fn statistics(&mut self, context_id: i64) -> Result<QuestionStatistics, Self::Error> {
        let total = self
            .count_statistic(
                &format!("SELECT COUNT(DISTINCT q.id) {QUESTIONS_FROM} WHERE qc.contextid = $1"),
                context_id,
            )
            .await?;

        let unused = self
            .count_statistic(
                &format!(
                    "SELECT COUNT(DISTINCT q.id) {QUESTIONS_FROM}
                     WHERE qc.contextid = $1 AND NOT {IS_USED}"
                ),
                context_id,
            )
            .await?;

        let duplicates = self
            .count_statistic(
                &format!(
                    "SELECT COALESCE(SUM(d.count - 1), 0)::bigint FROM (
                        SELECT COUNT(*) AS count {QUESTIONS_FROM}
                        WHERE qc.contextid = $1
                        GROUP BY q.name
                        HAVING COUNT(*) > 1
                     ) d"
                ),
                context_id,
            )
            .await?;

        let empty_categories = self
            .count_statistic(
                &format!(
                    "SELECT COUNT(*) FROM {{question_categories}} qc
                     WHERE qc.contextid = $1 AND qc.name <> 'top' AND {CATEGORY_IS_EMPTY}"
                ),
                context_id,
            )
            .await?;

        let empty_duplicate_categories = self
            .count_statistic(
                &format!(
                    "SELECT COUNT(*) FROM (
                        SELECT qc.id,
                               ROW_NUMBER() OVER (PARTITION BY qc.name ORDER BY qc.id) AS rn
                        FROM {{question_categories}} qc
                        WHERE qc.contextid = $1 AND qc.name <> 'top'
                     ) d
                     JOIN {{question_categories}} qc ON qc.id = d.id
                     WHERE d.rn > 1 AND {CATEGORY_IS_EMPTY}"
                ),
                context_id,
            )
            .await?;

        Ok(QuestionStatistics {
            total,
            unused,
            duplicates,
            empty_categories,
            empty_duplicate_categories,
        })
    }

    #[tracing::instrument(
        name = "db.question.count_by_qtype",
        skip_all,
        fields(
            context.id = context_id,
            db.query.text,
        ),
        err,
    )]
    async fn count_by_qtype(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(String, usize)>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT q.qtype, COUNT(*) {QUESTIONS_FROM}
             WHERE qc.contextid = $1
             GROUP BY q.qtype
             ORDER BY q.qtype"
        ));
        let res: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(context_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        res.into_iter()
            .map(|(qtype, count)| -> Result<_, DatabaseError> {
                Ok((qtype, crate::count(count)?))
            })
            .collect()
    }

    #[tracing::instrument(
        name = "db.question.count_by_status",
        skip_all,
        fields(
            context.id = context_id,
            db.query.text,
        ),
        err,
    )]
    async fn count_by_status(
        &mut self,
        context_id: i64,
    ) -> Result<Vec<(QuestionStatus, usize)>, Self::Error> {
        let sql = self.tables.sql(&format!(
            "SELECT qv.status, COUNT(*) {QUESTIONS_FROM}
             WHERE qc.contextid = $1
             GROUP BY qv.status
             ORDER BY qv.status"
        ));
        let res: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(context_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        res.into_iter()
            .map(|(status, count)| -> Result<(QuestionStatus, usize), DatabaseError> {
                let status = status.parse().map_err(|e| {
                    DatabaseInconsistencyError::on("question_versions")
                        .column("status")
                        .source(e)
                })?;
                Ok((status, crate::count(count)?))
            })
            .collect()
    }
}
