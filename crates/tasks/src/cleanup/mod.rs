// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The cleanup steps
//!
//! Steps run on a single context, or on the whole site, in this order:
//!
//! - [`duplicates`]: duplicate questions, then duplicate categories
//! - [`categories`]: empty categories
//! - [`unused`]: unused hidden questions
//!
//! Each step returns whether it stopped because of the deadline.

use std::fmt;

use serde::Serialize;

use crate::{
    CleanupError, Deadline, ProgressReporter, State,
    policy::{Outcome, SkipReason},
};

mod categories;
mod duplicates;
mod unused;

pub(crate) use self::unused::unused_questions;

/// A step of the cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DuplicateQuestions,
    DuplicateCategories,
    EmptyCategories,
    UnusedQuestions,
}

impl Step {
    /// Every step, in the order they run
    pub const ALL: [Step; 4] = [
        Step::DuplicateQuestions,
        Step::DuplicateCategories,
        Step::EmptyCategories,
        Step::UnusedQuestions,
    ];

    /// How the step is called in summaries
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DuplicateQuestions => "Duplicate Questions",
            Self::DuplicateCategories => "Duplicate Categories",
            Self::EmptyCategories => "Empty Categories",
            Self::UnusedQuestions => "Unused Questions",
        }
    }

    /// Run the step on the given context, or on the whole site
    pub(crate) async fn run(
        self,
        state: &State,
        context_id: Option<i64>,
        deadline: &Deadline,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<bool, CleanupError> {
        match self {
            Self::DuplicateQuestions => {
                duplicates::duplicate_questions(state, context_id, deadline, reporter).await
            }
            Self::DuplicateCategories => {
                duplicates::duplicate_categories(state, context_id, deadline, reporter).await
            }
            Self::EmptyCategories => {
                categories::empty_categories(state, context_id, deadline, reporter).await
            }
            Self::UnusedQuestions => unused_questions(state, context_id, deadline, reporter).await,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Describe what happened to a candidate.
///
/// Deleted candidates are described with `deleted`, the others with `kept`.
fn describe(deleted: &str, kept: &str, outcome: &Outcome, name: &str, id: i64) -> String {
    match outcome {
        Outcome::Deleted => format!("Deleted {deleted}: {name} (ID: {id})"),
        Outcome::Skipped(SkipReason::Used(usage)) => {
            let info = usage.as_ref().map(ToString::to_string).unwrap_or_default();
            format!("Skipped {kept} (used in quiz attempts): {name} (ID: {id}){info}")
        }
        Outcome::Skipped(reason) => format!("Skipped {kept} ({reason}): {name} (ID: {id})"),
        Outcome::Fixed => format!("Fixed {kept}: {name} (ID: {id})"),
        Outcome::Failed(reason) => format!("Failed {kept} ({reason}): {name} (ID: {id})"),
    }
}

#[cfg(test)]
mod tests {
    use janitor_data_model::QuestionUsageInfo;

    use super::*;

    #[test]
    fn candidate_messages() {
        let kinds = ("duplicate question", "duplicate question");
        insta::assert_snapshot!(
            [
                Outcome::Deleted,
                Outcome::Skipped(SkipReason::Used(Some(QuestionUsageInfo {
                    component: "mod_quiz".to_owned(),
                    context_id: 30,
                    course_id: Some(2),
                    course_module_id: Some(7),
                    activity: Some("Midterm".to_owned()),
                }))),
                Outcome::Skipped(SkipReason::Used(None)),
                Outcome::Skipped(SkipReason::StillPresent),
                Outcome::Skipped(SkipReason::Error("connection reset".to_owned())),
                Outcome::Skipped(SkipReason::HasQuestions(4)),
                Outcome::Skipped(SkipReason::HasSubcategories(2)),
            ]
            .iter()
            .map(|outcome| describe(kinds.0, kinds.1, outcome, "Q1", 12))
            .collect::<Vec<_>>()
            .join("\n"),
            @r#"
        Deleted duplicate question: Q1 (ID: 12)
        Skipped duplicate question (used in quiz attempts): Q1 (ID: 12) - Used in mod_quiz: "Midterm" (Course ID: 2, CM ID: 7)
        Skipped duplicate question (used in quiz attempts): Q1 (ID: 12)
        Skipped duplicate question (deletion failed - still present after delete): Q1 (ID: 12)
        Skipped duplicate question (error: connection reset): Q1 (ID: 12)
        Skipped duplicate question (has 4 questions): Q1 (ID: 12)
        Skipped duplicate question (has 2 subcategories): Q1 (ID: 12)
        "#
        );
    }
}
