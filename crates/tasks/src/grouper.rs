// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Group questions and categories sharing the same name.

use janitor_data_model::{Question, QuestionCategory};
use janitor_storage::{DuplicateGroup, RepositoryAccess, RepositoryError};

use crate::State;

/// The members of a group of rows sharing the same name in the same context,
/// oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group<T> {
    /// The shared name
    pub key: String,

    /// The members, the first one being the survivor
    pub members: Vec<T>,
}

impl<T> Group<T> {
    /// The member which is kept
    #[must_use]
    pub fn survivor(&self) -> Option<&T> {
        self.members.first()
    }

    /// The members which can go, from the oldest to the newest
    #[must_use]
    pub fn candidates(&self) -> &[T] {
        self.members.get(1..).unwrap_or_default()
    }
}

/// Finds groups of duplicates, and their members
pub struct DuplicateGrouper<'a> {
    state: &'a State,
}

impl<'a> DuplicateGrouper<'a> {
    #[must_use]
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    /// The number of candidates over all the groups
    #[must_use]
    pub fn candidate_count(groups: &[DuplicateGroup]) -> usize {
        groups.iter().map(DuplicateGroup::surplus).sum()
    }

    /// The names shared by more than one question of a context
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn question_groups(
        &self,
        context_id: i64,
    ) -> Result<Vec<DuplicateGroup>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let groups = repo.question().duplicate_names(context_id).await?;
        repo.save().await?;
        Ok(groups)
    }

    /// The names shared by more than one question of a context, in the
    /// contexts of every course except the site course
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn course_question_groups(
        &self,
        site_course_id: i64,
    ) -> Result<Vec<DuplicateGroup>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let courses = repo.course().list_except(site_course_id).await?;

        let mut groups = Vec::new();
        for course in courses {
            let Some(context_id) = repo.course().context_id(course.id).await? else {
                continue;
            };
            let course_groups = repo.question().duplicate_names(context_id).await?;
            groups.extend(course_groups);
        }
        repo.save().await?;

        Ok(groups)
    }

    /// The questions of a group, as they are now
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn question_members(
        &self,
        group: &DuplicateGroup,
    ) -> Result<Group<Question>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let mut members = repo
            .question()
            .list_by_name(group.context_id, &group.name)
            .await?;
        repo.save().await?;

        members.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(Group {
            key: group.name.clone(),
            members,
        })
    }

    /// The names shared by more than one category of a context, or of any
    /// context if none is given
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn category_groups(
        &self,
        context_id: Option<i64>,
    ) -> Result<Vec<DuplicateGroup>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let groups = repo.question_category().duplicate_names(context_id).await?;
        repo.save().await?;
        Ok(groups)
    }

    /// The categories of a group, as they are now
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn category_members(
        &self,
        group: &DuplicateGroup,
    ) -> Result<Group<QuestionCategory>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let mut members = repo
            .question_category()
            .list_by_name(group.context_id, &group.name)
            .await?;
        repo.save().await?;

        members.sort_by(|a, b| (&a.stamp, a.id).cmp(&(&b.stamp, b.id)));
        Ok(Group {
            key: group.name.clone(),
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    #[test]
    fn survivor_is_the_first_member() {
        let at = |seconds| DateTime::from_timestamp(seconds, 0).unwrap();
        let group = Group {
            key: "Q1".to_owned(),
            members: vec![
                Question::sample(1, "Q1", at(100)),
                Question::sample(3, "Q1", at(200)),
            ],
        };
        assert_eq!(group.survivor().map(|q| q.id), Some(1));
        assert_eq!(group.candidates().len(), 1);
        assert_eq!(group.candidates()[0].id, 3);

        let lonely: Group<Question> = Group {
            key: "Q2".to_owned(),
            members: vec![Question::sample(2, "Q2", at(150))],
        };
        assert!(lonely.candidates().is_empty());

        let groups = [
            DuplicateGroup {
                name: "Q1".to_owned(),
                context_id: 5,
                count: 3,
            },
            DuplicateGroup {
                name: "Q3".to_owned(),
                context_id: 5,
                count: 2,
            },
        ];
        assert_eq!(DuplicateGrouper::candidate_count(&groups), 3);
    }
}
