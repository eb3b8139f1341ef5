// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Remove duplicate questions and duplicate empty categories

use super::describe;
use crate::{
    CleanupError, Deadline, ProgressReporter, State,
    error::IntoStore,
    grouper::DuplicateGrouper,
    policy::{Candidate, DeletionPolicy, Mode},
};

/// Delete every question sharing its name with an older question of the same
/// context, unless it is used.
///
/// Without a context, the contexts of every course are looked at.
#[tracing::instrument(name = "cleanup.duplicate_questions", skip_all, fields(context.id = context_id))]
pub(super) async fn duplicate_questions(
    state: &State,
    context_id: Option<i64>,
    deadline: &Deadline,
    reporter: &mut ProgressReporter<'_>,
) -> Result<bool, CleanupError> {
    let grouper = DuplicateGrouper::new(state);
    let policy = DeletionPolicy::new(state);

    let groups = match context_id {
        Some(context_id) => grouper.question_groups(context_id).await,
        None => {
            grouper
                .course_question_groups(state.site_config().site_course_id)
                .await
        }
    }
    .into_store("listing duplicate questions")?;

    let total = DuplicateGrouper::candidate_count(&groups);
    reporter.set_total(total);
    if total == 0 {
        reporter.emit("No duplicate questions found.");
        return Ok(false);
    }
    reporter.emit(&format!("Found {total} duplicate questions to delete."));

    for group in &groups {
        let group = grouper
            .question_members(group)
            .await
            .into_store_with(|| format!("listing the questions named {:?}", group.name))?;

        for question in group.candidates() {
            let outcome = policy
                .evaluate_and_act(Candidate::DuplicateQuestion(question), Mode::Delete)
                .await;
            reporter.detail(&describe(
                "duplicate question",
                "duplicate question",
                &outcome,
                &question.name,
                question.id,
            ));
            reporter.tally(&outcome);

            if deadline.is_reached() {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Delete every empty category sharing its name with an older category of
/// the same context
#[tracing::instrument(name = "cleanup.duplicate_categories", skip_all, fields(context.id = context_id))]
pub(super) async fn duplicate_categories(
    state: &State,
    context_id: Option<i64>,
    deadline: &Deadline,
    reporter: &mut ProgressReporter<'_>,
) -> Result<bool, CleanupError> {
    let grouper = DuplicateGrouper::new(state);
    let policy = DeletionPolicy::new(state);

    let groups = grouper
        .category_groups(context_id)
        .await
        .into_store("listing duplicate categories")?;

    let total = DuplicateGrouper::candidate_count(&groups);
    reporter.set_total(total);
    if total == 0 {
        reporter.emit("No duplicate categories found.");
        return Ok(false);
    }
    reporter.emit(&format!("Found {total} duplicate categories to check."));

    for group in &groups {
        let group = grouper
            .category_members(group)
            .await
            .into_store_with(|| format!("listing the categories named {:?}", group.name))?;

        for category in group.candidates() {
            let outcome = policy
                .evaluate_and_act(Candidate::Category(category), Mode::Delete)
                .await;
            reporter.detail(&describe(
                "empty duplicate category",
                "duplicate category",
                &outcome,
                &category.name,
                category.id,
            ));
            reporter.tally(&outcome);

            if deadline.is_reached() {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
