// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`UserRepository`].

use async_trait::async_trait;
use janitor_data_model::User;
use janitor_storage::user::UserRepository;
use sqlx::PgConnection;

use crate::{DatabaseError, ExecuteExt, Tables};

/// An implementation of [`UserRepository`] for a PostgreSQL connection
pub struct PgUserRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgUserRepository<'c> {
    /// Create a new [`PgUserRepository`] from an active PostgreSQL connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

#[derive(sqlx::FromRow)]
struct UserLookup {
    id: i64,
    username: String,
    firstname: String,
    lastname: String,
    email: String,
    deleted: bool,
}

impl From<UserLookup> for User {
    fn from(value: UserLookup) -> Self {
        User {
            id: value.id,
            username: value.username,
            first_name: value.firstname,
            last_name: value.lastname,
            // The LMS stores missing emails as empty strings
            email: Some(value.email).filter(|email| !email.is_empty()),
            deleted: value.deleted,
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.user.lookup",
        skip_all,
        fields(
            user.id = id,
            db.query.text,
        ),
        err,
    )]
    async fn lookup(&mut self, id: i64) -> Result<Option<User>, Self::Error> {
        let sql = self.tables.sql(
            "SELECT id, username, firstname, lastname, email, deleted <> 0 AS deleted
             FROM {user}
             WHERE id = $1",
        );
        let res: Option<UserLookup> = sqlx::query_as(&sql)
            .bind(id)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(res.map(Into::into))
    }
}
