// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`QuestionTypeRepository`].

use async_trait::async_trait;
use janitor_storage::qtype::{
    QuestionTypeRepository, SatelliteRecord, SatelliteTable, SatelliteValue,
};
use sqlx::PgConnection;

use crate::{DatabaseError, ExecuteExt, Tables};

/// An implementation of [`QuestionTypeRepository`] for a PostgreSQL
/// connection
pub struct PgQuestionTypeRepository<'c> {
    conn: &'c mut PgConnection,
    tables: &'c Tables,
}

impl<'c> PgQuestionTypeRepository<'c> {
    /// Create a new [`PgQuestionTypeRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }
}

/// Build the insert statement for a record, with one placeholder per column,
/// the question ID being bound first
fn insert_statement(record: &SatelliteRecord) -> String {
    let mut columns = vec![record.table.question_column];
    columns.extend(record.columns.iter().map(|(column, _)| *column));

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();

    format!(
        "INSERT INTO {{{}}} ({}) VALUES ({})",
        record.table.name,
        columns.join(", "),
        placeholders.join(", "),
    )
}

#[async_trait]
impl QuestionTypeRepository for PgQuestionTypeRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.question_type.table_exists",
        skip_all,
        fields(table.name = table.name),
        err,
    )]
    async fn table_exists(&mut self, table: SatelliteTable) -> Result<bool, Self::Error> {
        let exists = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.tables.name(table.name))
            .fetch_one(&mut *self.conn)
            .await?;

        Ok(exists)
    }

    #[tracing::instrument(
        name = "db.question_type.insert",
        skip_all,
        fields(
            table.name = record.table.name,
            question.id = record.question_id,
            db.query.text,
        ),
        err,
    )]
    async fn insert(&mut self, record: &SatelliteRecord) -> Result<(), Self::Error> {
        let sql = self.tables.sql(&insert_statement(record));
        let mut query = sqlx::query(&sql).bind(record.question_id);
        for (_, value) in &record.columns {
            query = match value {
                SatelliteValue::Int(value) => query.bind(*value),
                SatelliteValue::Float(value) => query.bind(*value),
                SatelliteValue::Text(value) => query.bind(value.as_str()),
            };
        }

        let res = query.traced().execute(&mut *self.conn).await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement_binds_every_column() {
        let record = SatelliteRecord::new(SatelliteTable::legacy("question_truefalse"), 42)
            .with("trueanswer", 0_i64)
            .with("falseanswer", 0_i64);

        let tables = Tables::default();
        assert_eq!(
            tables.sql(&insert_statement(&record)),
            "INSERT INTO mdl_question_truefalse (question, trueanswer, falseanswer) VALUES ($1, $2, $3)",
        );
    }
}
