// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`QueueJobRepository`], on top of the ad-hoc task table of the LMS.
//!
//! Each queue maps to a task class of the plugin, and the job payload is
//! stored as JSON in the `customdata` column. This keeps jobs visible to the
//! LMS task scheduler tooling.

use async_trait::async_trait;
use chrono::Duration;
use janitor_data_model::CourseScope;
use janitor_storage::{
    Clock,
    queue::{Job, QueueJobRepository},
};
use sqlx::PgConnection;

use crate::{DatabaseError, DatabaseInconsistencyError, ExecuteExt, Tables, UnixTimestamp};

/// The component owning the tasks
const COMPONENT: &str = "local_deleteoldquizattempts";

/// The namespace of the task classes
const CLASS_PREFIX: &str = "\\local_deleteoldquizattempts\\task\\";

/// The minimum delay before retrying a failed task, in seconds
const MIN_FAIL_DELAY: i64 = 60;

fn class_name(queue_name: &str) -> String {
    format!("{CLASS_PREFIX}{queue_name}")
}

/// An implementation of [`QueueJobRepository`] for a PostgreSQL connection
pub struct PgQueueJobRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgQueueJobRepository<'c> {
    /// Create a new [`PgQueueJobRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct JobLookup {
    id: i64,
    classname: String,
    customdata: Option<String>,
    timecreated: UnixTimestamp,
}

impl TryFrom<JobLookup> for Job {
    type Error = DatabaseInconsistencyError;

    fn try_from(value: JobLookup) -> Result<Self, Self::Error> {
        let queue_name = value
            .classname
            .strip_prefix(CLASS_PREFIX)
            .ok_or_else(|| {
                DatabaseInconsistencyError::on("task_adhoc")
                    .column("classname")
                    .row(value.id)
            })?
            .to_owned();

        let payload = match value.customdata.as_deref() {
            None | Some("") => serde_json::Value::Null,
            Some(data) => serde_json::from_str(data).map_err(|e| {
                DatabaseInconsistencyError::on("task_adhoc")
                    .column("customdata")
                    .row(value.id)
                    .source(e)
            })?,
        };

        Ok(Job {
            id: value.id,
            queue_name,
            payload,
            created_at: value.timecreated.into(),
        })
    }
}

#[async_trait]
impl QueueJobRepository for PgQueueJobRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.queue_job.schedule",
        fields(
            queue_job.id,
            queue_job.queue_name = queue_name,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn schedule(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<i64, Self::Error> {
        let now = clock.now().timestamp();
        let user_id = payload.get("userid").and_then(serde_json::Value::as_i64);
        let sql = self.tables.sql(
            "INSERT INTO {task_adhoc}
                (component, classname, nextruntime, faildelay, customdata, userid, blocking,
                 timecreated)
             VALUES ($1, $2, $3, 0, $4, $5, 0, $3)
             RETURNING id",
        );
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(COMPONENT)
            .bind(class_name(queue_name))
            .bind(now)
            .bind(payload.to_string())
            .bind(user_id)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        tracing::Span::current().record("queue_job.id", id);

        Ok(id)
    }

    #[tracing::instrument(
        name = "db.queue_job.find_pending",
        fields(
            queue_job.queue_name = queue_name,
            queue_job.course_scope = %course_scope,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn find_pending(
        &mut self,
        queue_name: &str,
        course_scope: CourseScope,
    ) -> Result<Option<Job>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT id, classname, customdata, timecreated
             FROM {task_adhoc}
             WHERE classname = $1
               AND (customdata::jsonb ->> 'courseid')::bigint = $2
               AND (faildelay = 0 OR faildelay IS NULL)
             ORDER BY id
             LIMIT 1",
        );
        let res: Option<JobLookup> = sqlx::query_as(&sql)
            .bind(class_name(queue_name))
            .bind(course_scope.course_id().unwrap_or(0))
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        let Some(res) = res else {
            return Ok(None);
        };

        Ok(Some(res.try_into()?))
    }

    #[tracing::instrument(
        name = "db.queue_job.reserve",
        fields(
            queue_job.queue_name = queue_name,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn reserve(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        count: usize,
    ) -> Result<Vec<Job>, Self::Error> {
        let now = clock.now().timestamp();
        let sql = self.tables.sql(
            "UPDATE {task_adhoc}
             SET timestarted = $2
             WHERE id IN (
                SELECT id FROM {task_adhoc}
                WHERE classname = $1
                  AND timestarted IS NULL
                  AND nextruntime <= $2
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
             )
             RETURNING id, classname, customdata, timecreated",
        );
        let res: Vec<JobLookup> = sqlx::query_as(&sql)
            .bind(class_name(queue_name))
            .bind(now)
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        let mut jobs = res
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| job.id);

        Ok(jobs)
    }

    #[tracing::instrument(
        name = "db.queue_job.release_stale",
        fields(
            queue_job.queue_name = queue_name,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn release_stale(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        lease: Duration,
    ) -> Result<usize, Self::Error> {
        let threshold = (clock.now() - lease).timestamp();
        let sql = self.tables.sql(
            "UPDATE {task_adhoc}
             SET timestarted = NULL
             WHERE classname = $1
               AND timestarted IS NOT NULL
               AND timestarted < $2",
        );
        let res = sqlx::query(&sql)
            .bind(class_name(queue_name))
            .bind(threshold)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(usize::try_from(res.rows_affected()).unwrap_or(usize::MAX))
    }

    #[tracing::instrument(
        name = "db.queue_job.mark_as_completed",
        fields(
            queue_job.id = id,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn mark_as_completed(&mut self, id: i64) -> Result<(), Self::Error> {
        let sql = self.tables.sql("DELETE FROM {task_adhoc} WHERE id = $1");
        let res = sqlx::query(&sql)
            .bind(id)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(
        name = "db.queue_job.mark_as_failed",
        fields(
            queue_job.id = id,
            db.query.text,
        ),
        skip_all,
        err,
    )]
    async fn mark_as_failed(&mut self, clock: &dyn Clock, id: i64) -> Result<(), Self::Error> {
        let now = clock.now().timestamp();
        let sql = self.tables.sql(
            "UPDATE {task_adhoc}
             SET faildelay = GREATEST(COALESCE(faildelay, 0) * 2, $3),
                 nextruntime = $2 + GREATEST(COALESCE(faildelay, 0) * 2, $3),
                 timestarted = NULL
             WHERE id = $1",
        );
        let res = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .bind(MIN_FAIL_DELAY)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_from_task_row() {
        let row = JobLookup {
            id: 12,
            classname: class_name("cleanup_adhoc_task"),
            customdata: Some(r#"{"courseid":3,"userid":2}"#.to_owned()),
            timecreated: UnixTimestamp(chrono::DateTime::UNIX_EPOCH),
        };
        let job = Job::try_from(row).unwrap();
        assert_eq!(job.queue_name, "cleanup_adhoc_task");
        assert_eq!(job.payload["courseid"], 3);

        let row = JobLookup {
            id: 13,
            classname: "\\core\\task\\something_else".to_owned(),
            customdata: None,
            timecreated: UnixTimestamp(chrono::DateTime::UNIX_EPOCH),
        };
        assert!(Job::try_from(row).is_err());
    }
}
