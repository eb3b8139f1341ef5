// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with the type-specific tables of questions

use async_trait::async_trait;

use crate::repository_impl;

/// A table holding type-specific data of questions, one row per question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SatelliteTable {
    /// Name of the table, without the table prefix
    pub name: &'static str,

    /// Name of the column referencing the question
    pub question_column: &'static str,
}

impl SatelliteTable {
    /// A table referencing the question through a `questionid` column
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            question_column: "questionid",
        }
    }

    /// A table from older question types, referencing the question through a
    /// `question` column
    #[must_use]
    pub const fn legacy(name: &'static str) -> Self {
        Self {
            name,
            question_column: "question",
        }
    }
}

/// The options table of each core question type
pub const OPTIONS_TABLES: &[(&str, SatelliteTable)] = &[
    ("multichoice", SatelliteTable::new("qtype_multichoice_options")),
    ("truefalse", SatelliteTable::legacy("question_truefalse")),
    ("shortanswer", SatelliteTable::new("qtype_shortanswer_options")),
    ("numerical", SatelliteTable::legacy("question_numerical_options")),
    ("essay", SatelliteTable::new("qtype_essay_options")),
    ("match", SatelliteTable::new("qtype_match_options")),
    ("calculated", SatelliteTable::legacy("question_calculated_options")),
];

/// Find the options table of a question type
#[must_use]
pub fn options_table(qtype: &str) -> Option<SatelliteTable> {
    OPTIONS_TABLES
        .iter()
        .find(|(name, _)| *name == qtype)
        .map(|(_, table)| *table)
}

/// A value to insert in a [`SatelliteTable`]
#[derive(Debug, Clone, PartialEq)]
pub enum SatelliteValue {
    /// An integer column
    Int(i64),

    /// A decimal column
    Float(f64),

    /// A text column
    Text(String),
}

impl From<i64> for SatelliteValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SatelliteValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SatelliteValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// A row to insert in a [`SatelliteTable`]
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteRecord {
    /// The table to insert the row in
    pub table: SatelliteTable,

    /// The question the row belongs to
    pub question_id: i64,

    /// The other columns of the row
    pub columns: Vec<(&'static str, SatelliteValue)>,
}

impl SatelliteRecord {
    /// Start a new record for the given question
    #[must_use]
    pub fn new(table: SatelliteTable, question_id: i64) -> Self {
        Self {
            table,
            question_id,
            columns: Vec::new(),
        }
    }

    /// Set a column of the record
    #[must_use]
    pub fn with(mut self, column: &'static str, value: impl Into<SatelliteValue>) -> Self {
        self.columns.push((column, value.into()));
        self
    }

    /// Get the value of a column, if it was set
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SatelliteValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

/// A [`QuestionTypeRepository`] helps interacting with the tables of the
/// question types
#[async_trait]
pub trait QuestionTypeRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Check whether a table exists in the database
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn table_exists(&mut self, table: SatelliteTable) -> Result<bool, Self::Error>;

    /// Insert a row in a type-specific table
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn insert(&mut self, record: &SatelliteRecord) -> Result<(), Self::Error>;
}

repository_impl!(QuestionTypeRepository:
    async fn table_exists(&mut self, table: SatelliteTable) -> Result<bool, Self::Error>;
    async fn insert(&mut self, record: &SatelliteRecord) -> Result<(), Self::Error>;
);
