// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Find questions with missing type-specific data, and repair them

use janitor_data_model::{CourseScope, Question};
use janitor_storage::{RepositoryAccess, RepositoryError};
use serde::Serialize;

use crate::{
    CleanupError, Deadline, ProgressReporter, ProgressSink, State,
    error::IntoStore,
    policy::{Candidate, DeletionPolicy, Mode, Outcome},
};

/// The question types which can't work without answers
pub const ANSWER_QTYPES: &[&str] = &[
    "multichoice",
    "truefalse",
    "shortanswer",
    "numerical",
    "essay",
    "match",
    "ordering",
];

/// What a repair did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    /// Questions deleted or repaired
    pub fixed: usize,

    /// Questions still broken, including all of them when only reporting
    pub failed: usize,

    pub halted_by_deadline: bool,
}

impl RepairSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Deleted | Outcome::Fixed => self.fixed += 1,
            Outcome::Skipped(_) | Outcome::Failed(_) => self.failed += 1,
        }
    }
}

async fn context_of(state: &State, scope: CourseScope) -> Result<Option<i64>, CleanupError> {
    let Some(course_id) = scope.course_id() else {
        return Ok(None);
    };

    let context_id = async {
        let mut repo = state.repository().await?;
        let context_id = repo.course().context_id(course_id).await?;
        repo.save().await?;
        Ok::<_, RepositoryError>(context_id)
    }
    .await
    .into_store_with(|| format!("looking up course {course_id}"))?;

    context_id
        .map(Some)
        .ok_or(CleanupError::CourseNotFound(course_id))
}

fn describe(mode: Mode, candidate: Candidate<'_>, question: &Question, outcome: &Outcome) -> String {
    let Question { id, name, qtype, .. } = question;
    match (mode, outcome) {
        (Mode::Report, _) => {
            let issue = match candidate {
                Candidate::MissingAnswers(_) => "has no answers",
                _ => "is missing its options",
            };
            format!("Question {name} (ID: {id}, type {qtype}) {issue}")
        }
        (_, Outcome::Deleted) => format!("Deleted question: {name} (ID: {id})"),
        (_, Outcome::Fixed) => format!("Fixed question: {name} (ID: {id})"),
        (_, Outcome::Skipped(reason)) => {
            format!("Could not repair question ({reason}): {name} (ID: {id})")
        }
        (_, Outcome::Failed(reason)) => {
            format!("Could not repair question ({reason}): {name} (ID: {id})")
        }
    }
}

/// Handle every question of a list, until the deadline is reached
async fn process<'q>(
    policy: &DeletionPolicy<'_>,
    questions: &'q [Question],
    candidate: fn(&'q Question) -> Candidate<'q>,
    mode: Mode,
    deadline: &Deadline,
    reporter: &mut ProgressReporter<'_>,
    summary: &mut RepairSummary,
) -> bool {
    for question in questions {
        let candidate = candidate(question);
        let outcome = policy.evaluate_and_act(candidate, mode).await;
        let message = describe(mode, candidate, question, &outcome);
        if mode == Mode::Report {
            reporter.emit(&message);
        } else {
            reporter.detail(&message);
        }
        summary.record(&outcome);

        if deadline.is_reached() {
            return true;
        }
    }

    false
}

/// Look for questions missing their options, then for questions missing
/// their answers, and report, delete or fix them.
///
/// # Errors
///
/// Returns an error if the course of the scope doesn't exist, or if the
/// questions could not be listed.
#[tracing::instrument(name = "cleanup.repair", skip_all, fields(%mode, %scope))]
pub async fn repair(
    state: &State,
    scope: CourseScope,
    mode: Mode,
    deadline: &Deadline,
    sink: &mut dyn ProgressSink,
    verbose: bool,
) -> Result<RepairSummary, CleanupError> {
    let context_id = context_of(state, scope).await?;
    let policy = DeletionPolicy::new(state);
    let mut reporter = ProgressReporter::new(sink, verbose);
    let mut summary = RepairSummary::default();

    'passes: {
        for (qtype, table) in state.registry().qtypes() {
            let questions = async {
                let mut repo = state.repository().await?;
                if !repo.question_type().table_exists(table).await? {
                    repo.save().await?;
                    return Ok(None);
                }

                let questions = repo
                    .question()
                    .list_missing_options(context_id, qtype, table)
                    .await?;
                repo.save().await?;
                Ok::<_, RepositoryError>(Some(questions))
            }
            .await
            .into_store_with(|| format!("looking for {qtype} questions without options"))?;

            let Some(questions) = questions else {
                reporter.detail(&format!(
                    "Skipping {qtype}: table {} does not exist",
                    table.name
                ));
                continue;
            };

            let halted = process(
                &policy,
                &questions,
                Candidate::MissingOptions,
                mode,
                deadline,
                &mut reporter,
                &mut summary,
            )
            .await;
            if halted {
                break 'passes;
            }
        }

        let questions = async {
            let mut repo = state.repository().await?;
            let questions = repo
                .question()
                .list_without_answers(context_id, ANSWER_QTYPES)
                .await?;
            repo.save().await?;
            Ok::<_, RepositoryError>(questions)
        }
        .await
        .into_store("looking for questions without answers")?;

        process(
            &policy,
            &questions,
            Candidate::MissingAnswers,
            mode,
            deadline,
            &mut reporter,
            &mut summary,
        )
        .await;
    }

    summary.halted_by_deadline = deadline.is_reached();
    if summary.halted_by_deadline {
        reporter.emit("Operation stopped due to time limit");
    }

    let done = match mode {
        Mode::Report => summary.failed,
        Mode::Delete | Mode::Fix => summary.fixed,
    };
    reporter.emit(&format!(
        "Operation complete ({mode}): {}: {done}, Issues: {}",
        mode.done_label(),
        summary.failed
    ));

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use janitor_data_model::QuestionStatus;
    use janitor_storage::qtype::{SatelliteValue, options_table};

    use super::*;
    use crate::{BufferSink, test_utils::TestState};

    struct Fixture {
        test: TestState,
        truefalse: i64,
        multichoice: i64,
    }

    /// A true/false question without options, and a multiple choice one
    /// without answers
    fn fixture() -> Fixture {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");

        let truefalse = test
            .store
            .add_question(category, "TF", "truefalse", 100, QuestionStatus::Ready);
        test.store.add_answer(truefalse);
        test.store.add_table(options_table("truefalse").unwrap());

        let multichoice = test
            .store
            .add_question(category, "MC", "multichoice", 100, QuestionStatus::Ready);

        Fixture {
            test,
            truefalse,
            multichoice,
        }
    }

    async fn run(test: &TestState, mode: Mode) -> (RepairSummary, Vec<String>) {
        let mut sink = BufferSink::new();
        let summary = repair(
            &test.state,
            CourseScope::Course(2),
            mode,
            &test.unlimited(),
            &mut sink,
            false,
        )
        .await
        .unwrap();
        (summary, sink.lines())
    }

    #[tokio::test]
    async fn report_only_counts() {
        let Fixture {
            test,
            truefalse,
            multichoice,
        } = fixture();

        let (summary, lines) = run(&test, Mode::Report).await;

        assert_eq!(summary.fixed, 0);
        assert_eq!(summary.failed, 2);
        assert!(test.store.operations().is_empty());
        assert_eq!(
            lines,
            vec![
                format!("Question TF (ID: {truefalse}, type truefalse) is missing its options"),
                format!("Question MC (ID: {multichoice}, type multichoice) has no answers"),
                "Operation complete (report): Found: 2, Issues: 2".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn fix_inserts_the_defaults() {
        let Fixture {
            test,
            truefalse,
            multichoice,
        } = fixture();

        let (summary, lines) = run(&test, Mode::Fix).await;

        assert_eq!(summary.fixed, 1);
        assert_eq!(summary.failed, 1);
        let record = test
            .store
            .options(options_table("truefalse").unwrap(), truefalse)
            .unwrap();
        assert_eq!(record.get("trueanswer"), Some(&SatelliteValue::Int(0)));
        assert!(test.store.has_question(multichoice));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Operation complete (fix): Fixed: 1, Issues: 1")
        );

        // Fixed questions are not found again
        let (summary, _) = run(&test, Mode::Fix).await;
        assert_eq!(summary.fixed, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn delete_removes_broken_questions() {
        let Fixture {
            test,
            truefalse,
            multichoice,
        } = fixture();

        let (summary, _) = run(&test, Mode::Delete).await;

        assert_eq!(summary.fixed, 2);
        assert_eq!(summary.failed, 0);
        assert!(!test.store.has_question(truefalse));
        assert!(!test.store.has_question(multichoice));
    }

    #[tokio::test]
    async fn unknown_course() {
        let Fixture { test, .. } = fixture();
        let mut sink = BufferSink::new();
        let result = repair(
            &test.state,
            CourseScope::Course(99),
            Mode::Report,
            &test.unlimited(),
            &mut sink,
            false,
        )
        .await;
        assert_matches!(result, Err(CleanupError::CourseNotFound(99)));
    }
}
