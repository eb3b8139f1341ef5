// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Remove empty categories

use std::{cmp::Reverse, collections::BTreeMap};

use janitor_data_model::QuestionCategory;
use janitor_storage::{RepositoryAccess, RepositoryError};

use super::describe;
use crate::{
    CleanupError, Deadline, ProgressReporter, State,
    error::IntoStore,
    policy::{Candidate, DeletionPolicy, Mode},
};

/// Delete every category without questions nor subcategories, except the
/// root ones.
///
/// Subcategories are looked at before their parent, so an empty branch goes
/// away in a single pass.
#[tracing::instrument(name = "cleanup.empty_categories", skip_all, fields(context.id = context_id))]
pub(super) async fn empty_categories(
    state: &State,
    context_id: Option<i64>,
    deadline: &Deadline,
    reporter: &mut ProgressReporter<'_>,
) -> Result<bool, CleanupError> {
    let policy = DeletionPolicy::new(state);

    let categories = async {
        let mut repo = state.repository().await?;
        let categories = repo.question_category().list(context_id).await?;
        repo.save().await?;
        Ok::<_, RepositoryError>(categories)
    }
    .await
    .into_store("listing categories")?;
    let categories = deepest_first(categories);

    reporter.set_total(categories.len());
    reporter.emit(&format!(
        "Scanning {} categories for empty ones...",
        categories.len()
    ));

    for category in &categories {
        let outcome = policy
            .evaluate_and_act(Candidate::Category(category), Mode::Delete)
            .await;
        reporter.detail(&describe(
            "empty category",
            "category",
            &outcome,
            &category.name,
            category.id,
        ));
        reporter.tally(&outcome);

        if deadline.is_reached() {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Sort categories from the deepest to the shallowest, then by ID
fn deepest_first(mut categories: Vec<QuestionCategory>) -> Vec<QuestionCategory> {
    let parents: BTreeMap<i64, i64> = categories
        .iter()
        .map(|category| (category.id, category.parent_id))
        .collect();

    let depth = |mut id: i64| {
        let mut depth = 0_usize;
        // Bounded, in case the parents form a loop
        while depth < parents.len() {
            match parents.get(&id) {
                Some(&parent) if parent != 0 => {
                    depth += 1;
                    id = parent;
                }
                _ => break,
            }
        }
        depth
    };

    categories.sort_by_key(|category| (Reverse(depth(category.id)), category.id));
    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: i64, parent_id: i64) -> QuestionCategory {
        QuestionCategory {
            id,
            name: format!("Category {id}"),
            context_id: 5,
            parent_id,
            stamp: String::new(),
        }
    }

    #[test]
    fn children_come_before_their_parent() {
        let categories = vec![
            category(1, 0),
            category(2, 1),
            category(3, 2),
            category(4, 1),
            category(5, 0),
        ];
        let order: Vec<i64> = deepest_first(categories)
            .iter()
            .map(|category| category.id)
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1, 5]);

        // Loops don't hang
        let order: Vec<i64> = deepest_first(vec![category(7, 8), category(8, 7)])
            .iter()
            .map(|category| category.id)
            .collect();
        assert_eq!(order.len(), 2);
    }
}
