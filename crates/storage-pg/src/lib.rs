// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for the PostgreSQL database of the
//! LMS.
//!
//! The janitor doesn't own the schema: it reads and deletes rows from the
//! tables the LMS manages, under a configurable table prefix. There are no
//! migrations here.
//!
//! # Writing a new repository
//!
//! Each repository holds a mutable reference to the connection and a
//! reference to the [`Tables`] helper, which expands `{table}` placeholders:
//!
//! ```rust,ignore
//! pub struct PgFakeDataRepository<'c> {
//!     conn: &'c mut PgConnection,
//!     tables: &'c Tables,
//! }
//!
//! #[async_trait]
//! impl FakeDataRepository for PgFakeDataRepository<'_> {
//!     type Error = DatabaseError;
//!
//!     #[tracing::instrument(
//!         name = "db.fake_data.lookup",
//!         skip_all,
//!         fields(fake_data.id = id, db.query.text),
//!         err,
//!     )]
//!     async fn lookup(&mut self, id: i64) -> Result<Option<FakeData>, Self::Error> {
//!         let sql = self.tables.sql("SELECT id, name FROM {fake_data} WHERE id = $1");
//!         let res: Option<FakeDataLookup> = sqlx::query_as(&sql)
//!             .bind(id)
//!             .traced()
//!             .fetch_optional(&mut *self.conn)
//!             .await?;
//!
//!         Ok(res.map(Into::into))
//!     }
//! }
//! ```
//!
//! Statements are built at runtime, since the table names are only known once
//! the configuration is loaded. Queries are instrumented with a `db.*` span,
//! and [`ExecuteExt::traced`] records the expanded statement in it.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use chrono::{DateTime, Utc};
use sqlx::Postgres;

pub mod attempt;
pub mod category;
pub mod course;
pub mod qtype;
pub mod question;
pub mod queue;
pub mod user;

mod errors;
pub(crate) mod repository;
pub(crate) mod sql;

pub use self::{
    errors::{DatabaseError, DatabaseInconsistencyError},
    repository::{PgRepository, PgRepositoryFactory},
    sql::{DEFAULT_TABLE_PREFIX, ExecuteExt, Tables},
};

/// A timestamp stored by the LMS as the number of seconds since the Unix
/// epoch
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct UnixTimestamp(DateTime<Utc>);

impl From<UnixTimestamp> for DateTime<Utc> {
    fn from(UnixTimestamp(value): UnixTimestamp) -> Self {
        value
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for UnixTimestamp {
    fn decode(
        value: <Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let seconds = <i64 as sqlx::Decode<Postgres>>::decode(value)?;
        let datetime = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| format!("timestamp {seconds} is out of range"))?;
        Ok(UnixTimestamp(datetime))
    }
}

impl sqlx::Type<Postgres> for UnixTimestamp {
    fn type_info() -> <Postgres as sqlx::Database>::TypeInfo {
        <i64 as sqlx::Type<Postgres>>::type_info()
    }
}

/// Convert a count returned by the database
pub(crate) fn count(value: i64) -> Result<usize, DatabaseError> {
    value.try_into().map_err(DatabaseError::invalid_operation)
}
