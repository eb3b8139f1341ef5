// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Helpers to build and trace the SQL statements sent to the LMS database.
//!
//! Statements are written with table names in braces, like `{question}`,
//! which get replaced with the prefixed name of the table, like
//! `mdl_question`.

use opentelemetry_semantic_conventions::attribute::DB_QUERY_TEXT;
use tracing::Span;

/// The table prefix used by default by the LMS
pub const DEFAULT_TABLE_PREFIX: &str = "mdl_";

/// Expands table names in SQL statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    prefix: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_PREFIX)
    }
}

impl Tables {
    /// Create a new [`Tables`] with the given prefix
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The table prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The full name of a table
    #[must_use]
    pub fn name(&self, table: &str) -> String {
        format!("{}{table}", self.prefix)
    }

    /// Replace every `{table}` placeholder in a statement with the prefixed
    /// table name.
    ///
    /// Braces which don't wrap a plain identifier are left untouched.
    #[must_use]
    pub fn sql(&self, statement: &str) -> String {
        let mut out = String::with_capacity(statement.len() + 16 * self.prefix.len());
        let mut rest = statement;

        while let Some(start) = rest.find('{') {
            let (before, after) = rest.split_at(start);
            out.push_str(before);

            let candidate = after[1..].find('}').map(|end| &after[1..=end]);
            match candidate {
                Some(name)
                    if !name.is_empty()
                        && name
                            .bytes()
                            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_') =>
                {
                    out.push_str(&self.prefix);
                    out.push_str(name);
                    rest = &after[name.len() + 2..];
                }
                _ => {
                    out.push('{');
                    rest = &after[1..];
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// An extension trait for [`sqlx::Execute`] that records the SQL statement as
/// `db.query.text` in a tracing span
pub trait ExecuteExt<'q, DB>: Sized {
    /// Records the statement as `db.query.text` in the current span
    #[must_use]
    fn traced(self) -> Self {
        self.record(&Span::current())
    }

    /// Records the statement as `db.query.text` in the given span
    #[must_use]
    fn record(self, span: &Span) -> Self;
}

impl<'q, DB, T> ExecuteExt<'q, DB> for T
where
    T: sqlx::Execute<'q, DB>,
    DB: sqlx::Database,
{
    fn record(self, span: &Span) -> Self {
        span.record(DB_QUERY_TEXT, self.sql());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_table_names() {
        let tables = Tables::default();
        assert_eq!(
            tables.sql("SELECT q.id FROM {question} q JOIN {question_versions} qv ON qv.questionid = q.id"),
            "SELECT q.id FROM mdl_question q JOIN mdl_question_versions qv ON qv.questionid = q.id",
        );

        let tables = Tables::new("m41_");
        assert_eq!(tables.sql("DELETE FROM {qtype_essay_options}"), "DELETE FROM m41_qtype_essay_options");
        assert_eq!(tables.name("course"), "m41_course");
    }

    #[test]
    fn leave_other_braces_alone() {
        let tables = Tables::default();
        assert_eq!(tables.sql("SELECT '{}', '{Not A Table}'"), "SELECT '{}', '{Not A Table}'");
        assert_eq!(tables.sql("SELECT '{unclosed"), "SELECT '{unclosed");
        assert_eq!(tables.sql("{a}{b}"), "mdl_amdl_b");
    }
}
