// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Name of the root category of every context. It can never be deleted.
pub const TOP_CATEGORY_NAME: &str = "top";

/// Component of the question usages created when previewing a question.
/// Attempts in those usages don't count as a question being used.
pub const PREVIEW_COMPONENT: &str = "core_question_preview";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub id: i64,
    pub name: String,
    pub qtype: String,
    pub created_at: DateTime<Utc>,
    pub category_id: i64,
}

impl Question {
    #[doc(hidden)]
    #[must_use]
    pub fn sample(id: i64, name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            qtype: "multichoice".to_owned(),
            created_at,
            category_id: 1,
        }
    }
}

/// Status of a question version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Ready,
    Hidden,
    Draft,
}

impl QuestionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Hidden => "hidden",
            Self::Draft => "draft",
        }
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown question status
#[derive(Debug, thiserror::Error)]
#[error("unknown question status {0:?}")]
pub struct UnknownQuestionStatus(String);

impl FromStr for QuestionStatus {
    type Err = UnknownQuestionStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "hidden" => Ok(Self::Hidden),
            "draft" => Ok(Self::Draft),
            other => Err(UnknownQuestionStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionCategory {
    pub id: i64,
    pub name: String,
    pub context_id: i64,
    pub parent_id: i64,

    /// Unique stamp generated when the category was created. Used as the
    /// creation order, as categories have no creation timestamp.
    pub stamp: String,
}

impl QuestionCategory {
    /// Whether this is the root category of its context
    #[must_use]
    pub fn is_top(&self) -> bool {
        self.name == TOP_CATEGORY_NAME
    }
}

/// Where a question is used, for reporting purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionUsageInfo {
    pub component: String,
    pub context_id: i64,
    pub course_id: Option<i64>,
    pub course_module_id: Option<i64>,
    pub activity: Option<String>,
}

impl fmt::Display for QuestionUsageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = "?".to_owned();
        write!(
            f,
            " - Used in {}: \"{}\" (Course ID: {}, CM ID: {})",
            self.component,
            self.activity.as_deref().unwrap_or("unknown"),
            self.course_id.map_or_else(|| unknown.clone(), |id| id.to_string()),
            self.course_module_id.map_or(unknown, |id| id.to_string()),
        )
    }
}

/// Question bank statistics for one course
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuestionStatistics {
    pub total: u64,
    pub unused: u64,
    pub duplicates: u64,
    pub empty_categories: u64,
    pub empty_duplicate_categories: u64,
}

impl QuestionStatistics {
    /// Add the counters of another course to this one
    pub fn accumulate(&mut self, other: &Self) {
        self.total += other.total;
        self.unused += other.unused;
        self.duplicates += other.duplicates;
        self.empty_categories += other.empty_categories;
        self.empty_duplicate_categories += other.empty_duplicate_categories;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_info_display() {
        let info = QuestionUsageInfo {
            component: "mod_quiz".to_owned(),
            context_id: 42,
            course_id: Some(3),
            course_module_id: Some(17),
            activity: Some("Week 1".to_owned()),
        };
        assert_eq!(
            info.to_string(),
            " - Used in mod_quiz: \"Week 1\" (Course ID: 3, CM ID: 17)"
        );

        let info = QuestionUsageInfo {
            component: "qbank".to_owned(),
            context_id: 42,
            course_id: None,
            course_module_id: None,
            activity: None,
        };
        assert_eq!(
            info.to_string(),
            " - Used in qbank: \"unknown\" (Course ID: ?, CM ID: ?)"
        );
    }

    #[test]
    fn status_roundtrip_names() {
        assert_eq!("hidden".parse::<QuestionStatus>().unwrap(), QuestionStatus::Hidden);
        assert!("deleted".parse::<QuestionStatus>().is_err());
    }
}
