// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Purge old quiz attempts

use chrono::{DateTime, Utc};
use janitor_data_model::QuizAttempt;
use janitor_storage::{RepositoryAccess, RepositoryError, attempt::QuizAttemptFilter};

use crate::{
    CleanupError, Deadline, PagedScanner, ProgressSink, State, Summary,
    error::IntoStore,
    policy::{Outcome, SkipReason},
    scanner::StaleAttempts,
};

/// Which attempts are considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptScope {
    /// Attempts on any quiz
    #[default]
    All,

    /// Attempts on the quizzes of a course
    Course(i64),

    /// Attempts on a single quiz
    Quiz(i64),
}

async fn filter_for(
    state: &State,
    cutoff: DateTime<Utc>,
    scope: AttemptScope,
) -> Result<QuizAttemptFilter, CleanupError> {
    let filter = QuizAttemptFilter::new(cutoff);
    match scope {
        AttemptScope::All => Ok(filter),

        AttemptScope::Course(id) => {
            let course = async {
                let mut repo = state.repository().await?;
                let course = repo.course().lookup(id).await?;
                repo.save().await?;
                Ok::<_, RepositoryError>(course)
            }
            .await
            .into_store_with(|| format!("looking up course {id}"))?;

            if course.is_none() {
                return Err(CleanupError::CourseNotFound(id));
            }
            Ok(filter.for_course(id))
        }

        AttemptScope::Quiz(id) => {
            let quiz = async {
                let mut repo = state.repository().await?;
                let quiz = repo.course().lookup_quiz(id).await?;
                repo.save().await?;
                Ok::<_, RepositoryError>(quiz)
            }
            .await
            .into_store_with(|| format!("looking up quiz {id}"))?;

            if quiz.is_none() {
                return Err(CleanupError::QuizNotFound(id));
            }
            Ok(filter.for_quiz(id))
        }
    }
}

async fn delete_attempt(state: &State, attempt: &QuizAttempt) -> Result<(), RepositoryError> {
    let mut repo = state.repository().await?;
    repo.quiz_attempt().delete(attempt).await?;
    repo.save().await
}

/// Delete the quiz attempts started before the cutoff, one at a time, until
/// there are none left or the deadline is reached.
///
/// # Errors
///
/// Returns an error if the course or quiz of the scope doesn't exist, or if
/// the attempts could not be listed. Failing to delete a single attempt is
/// not an error: it is counted as skipped.
#[tracing::instrument(name = "cleanup.purge_attempts", skip_all, fields(%cutoff))]
pub async fn purge_attempts(
    state: &State,
    cutoff: DateTime<Utc>,
    scope: AttemptScope,
    deadline: &Deadline,
    sink: &mut dyn ProgressSink,
) -> Result<Summary, CleanupError> {
    let filter = filter_for(state, cutoff, scope).await?;

    let total = async {
        let mut repo = state.repository().await?;
        let total = repo.quiz_attempt().count(filter).await?;
        repo.save().await?;
        Ok::<_, RepositoryError>(total)
    }
    .await
    .into_store("counting quiz attempts")?;

    let mut summary = Summary {
        total,
        ..Summary::default()
    };

    if total == 0 {
        sink.output("No quiz attempts to delete.");
        return Ok(summary);
    }
    sink.output(&format!("Found {total} quiz attempts to delete."));

    let mut scanner = PagedScanner::new(StaleAttempts { state, filter }, deadline);
    while let Some(attempt) = scanner
        .next()
        .await
        .into_store("listing quiz attempts")?
    {
        match delete_attempt(state, &attempt).await {
            Ok(()) => {
                summary.record(&Outcome::Deleted);
                sink.output(&format!("Deleted {} of {total}", summary.deleted));
            }
            Err(e) => {
                tracing::warn!(
                    quiz_attempt.id = attempt.id,
                    error = &e as &dyn std::error::Error,
                    "Could not delete quiz attempt"
                );
                summary.record(&Outcome::Skipped(SkipReason::Error(e.to_string())));
            }
        }
    }

    if scanner.halted() {
        sink.output("Operation stopped due to time limit");
    }

    tracing::info!(
        deleted = summary.deleted,
        skipped = summary.skipped,
        "Purged quiz attempts"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use janitor_storage_memory::Operation;

    use super::*;
    use crate::{BufferSink, test_utils::TestState};

    fn cutoff(timestamp: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(timestamp, 0).unwrap()
    }

    #[tokio::test]
    async fn purge_before_the_cutoff() {
        let test = TestState::new();
        test.store.add_course(2, "Biology");
        let quiz = test.store.add_quiz(2, "Week 1");
        let old = test.store.add_attempt(quiz, 1000, &[]);
        let recent = test.store.add_attempt(quiz, 2000, &[]);

        let mut sink = BufferSink::new();
        let summary = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::All,
            &test.unlimited(),
            &mut sink,
        )
        .await
        .unwrap();

        assert!(!test.store.has_attempt(old));
        assert!(test.store.has_attempt(recent));
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(
            sink.lines(),
            vec![
                "Found 1 quiz attempts to delete.".to_owned(),
                "Deleted 1 of 1".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn purge_a_single_quiz() {
        let test = TestState::new();
        test.store.add_course(2, "Biology");
        test.store.add_course(3, "Chemistry");
        let biology = test.store.add_quiz(2, "Week 1");
        let chemistry = test.store.add_quiz(3, "Week 1");
        let kept = test.store.add_attempt(biology, 1000, &[]);
        let purged = test.store.add_attempt(chemistry, 1000, &[]);

        let mut sink = BufferSink::new();
        let summary = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::Quiz(chemistry),
            &test.unlimited(),
            &mut sink,
        )
        .await
        .unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(test.store.has_attempt(kept));
        assert!(!test.store.has_attempt(purged));

        let summary = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::Course(3),
            &test.unlimited(),
            &mut sink,
        )
        .await
        .unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(
            sink.lines().last().map(String::as_str),
            Some("No quiz attempts to delete.")
        );
    }

    #[tokio::test]
    async fn failures_are_skipped() {
        let test = TestState::new();
        test.store.add_course(2, "Biology");
        let quiz = test.store.add_quiz(2, "Week 1");
        let failing = test.store.add_attempt(quiz, 1000, &[]);
        let other = test.store.add_attempt(quiz, 1100, &[]);
        test.store.fail_on(Operation::DeleteAttempt(failing));

        let mut sink = BufferSink::new();
        let summary = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::All,
            &test.unlimited(),
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 1);
        assert!(test.store.has_attempt(failing));
        assert!(!test.store.has_attempt(other));
    }

    #[tokio::test]
    async fn unknown_scope() {
        let test = TestState::new();
        let mut sink = BufferSink::new();

        let result = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::Course(42),
            &test.unlimited(),
            &mut sink,
        )
        .await;
        assert_matches!(result, Err(CleanupError::CourseNotFound(42)));

        let result = purge_attempts(
            &test.state,
            cutoff(1500),
            AttemptScope::Quiz(42),
            &test.unlimited(),
            &mut sink,
        )
        .await;
        assert_matches!(result, Err(CleanupError::QuizNotFound(42)));
    }
}
