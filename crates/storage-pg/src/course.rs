// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`CourseRepository`].

use async_trait::async_trait;
use janitor_data_model::{Course, Quiz};
use janitor_storage::course::CourseRepository;
use sqlx::PgConnection;

use crate::{DatabaseError, ExecuteExt, Tables};

/// The context level of courses
const CONTEXT_COURSE: i64 = 50;

/// An implementation of [`CourseRepository`] for a PostgreSQL connection
pub struct PgCourseRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgCourseRepository<'c> {
    /// Create a new [`PgCourseRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct CourseLookup {
    id: i64,
    shortname: String,
    fullname: String,
}

impl From<CourseLookup> for Course {
    fn from(value: CourseLookup) -> Self {
        Course {
            id: value.id,
            short_name: value.shortname,
            full_name: value.fullname,
        }
    }
}

#[derive(sqlx::FromRow)]
struct QuizLookup {
    id: i64,
    course: i64,
    name: String,
}

impl From<QuizLookup> for Quiz {
    fn from(value: QuizLookup) -> Self {
        Quiz {
            id: value.id,
            course_id: value.course,
            name: value.name,
        }
    }
}

#[async_trait]
impl CourseRepository for PgCourseRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.course.lookup",
        skip_all,
        fields(
            course.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn lookup(&mut self, id: i64) -> Result<Option<Course>, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT id, shortname, fullname FROM {course} WHERE id = $1");
        let res: Option<CourseLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.course.list_except",
        skip_all,
        fields(db.query.text),
        err,
    )]
    async fn list_except(&mut self, site_course_id: i64) -> Result<Vec<Course>, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT id, shortname, fullname FROM {course} WHERE id <> $1 ORDER BY id");
        let res: Vec<CourseLookup> = sqlx::query_as(&sql)
            .bind(site_course_id)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.course.context_id",
        skip_all,
        fields(
            course.id = course_id,
            db.query.text,
        ),
        err,
    )]
    async fn context_id(&mut self, course_id: i64) -> Result<Option<i64>, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT id FROM {context} WHERE contextlevel = $1 AND instanceid = $2");
        let res = sqlx::query_scalar(&sql)
            .bind(CONTEXT_COURSE)
            .bind(course_id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res)
    }

    #[tracing::instrument(
        name = "db.course.lookup_quiz",
        skip_all,
        fields(
            quiz.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn lookup_quiz(&mut self, id: i64) -> Result<Option<Quiz>, Self::Error> {
        let sql = self
            .tables
            .sql("SELECT id, course, name FROM {quiz} WHERE id = $1");
        let res: Option<QuizLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }
}
