// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Remove unused hidden questions

use janitor_storage::{RepositoryAccess, RepositoryError};

use super::describe;
use crate::{
    CleanupError, Deadline, PagedScanner, ProgressReporter, State,
    error::IntoStore,
    policy::{Candidate, DeletionPolicy, Mode},
    scanner::UnusedQuestions,
};

/// Delete every hidden question which is neither attempted outside of a
/// preview nor pinned by a reference, in a context or in the whole site
#[tracing::instrument(name = "cleanup.unused_questions", skip_all, fields(context.id = context_id))]
pub(crate) async fn unused_questions(
    state: &State,
    context_id: Option<i64>,
    deadline: &Deadline,
    reporter: &mut ProgressReporter<'_>,
) -> Result<bool, CleanupError> {
    let policy = DeletionPolicy::new(state);

    let total = async {
        let mut repo = state.repository().await?;
        let total = repo.question().count_unused(context_id).await?;
        repo.save().await?;
        Ok::<_, RepositoryError>(total)
    }
    .await
    .into_store("counting unused questions")?;

    reporter.set_total(total);
    if total == 0 {
        reporter.emit("No unused hidden questions found.");
        return Ok(false);
    }
    reporter.emit(&format!("Found {total} unused hidden questions to delete."));

    let source = UnusedQuestions { state, context_id };
    let mut scanner = PagedScanner::new(source, deadline);
    while let Some(question) = scanner
        .next()
        .await
        .into_store("listing unused questions")?
    {
        let outcome = policy
            .evaluate_and_act(Candidate::Question(&question), Mode::Delete)
            .await;
        reporter.detail(&describe(
            "unused question",
            "unused question",
            &outcome,
            &question.name,
            question.id,
        ));
        reporter.tally(&outcome);
    }

    Ok(scanner.halted())
}
