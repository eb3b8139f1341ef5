// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Question bank statistics, per course and site-wide

use janitor_data_model::{Course, QuestionStatistics, QuestionStatus};
use janitor_storage::{BoxRepository, RepositoryAccess, RepositoryError};
use serde::Serialize;

use crate::{CleanupError, State, error::IntoStore};

/// The statistics of a single course
#[derive(Debug, Clone, Serialize)]
pub struct CourseStatistics {
    pub course: Course,
    pub stats: QuestionStatistics,

    /// Number of questions per question type, only computed in verbose mode
    pub by_qtype: Vec<(String, usize)>,

    /// Number of questions per version status, only computed in verbose mode
    pub by_status: Vec<(QuestionStatus, usize)>,
}

impl CourseStatistics {
    /// Format the statistics for display
    #[must_use]
    pub fn render(&self, verbose: bool) -> Vec<String> {
        let QuestionStatistics {
            total,
            unused,
            duplicates,
            empty_categories,
            empty_duplicate_categories,
        } = &self.stats;

        let mut lines = vec![
            format!("Course: {} (ID: {})", self.course.full_name, self.course.id),
            format!("  Total questions: {total}"),
            format!("  Unused questions: {unused}"),
            format!("  Duplicate questions: {duplicates}"),
            format!("  Empty categories: {empty_categories}"),
            format!("  Empty duplicate categories: {empty_duplicate_categories}"),
        ];

        if verbose {
            lines.push("  By question type:".to_owned());
            lines.extend(
                self.by_qtype
                    .iter()
                    .map(|(qtype, count)| format!("    {qtype}: {count}")),
            );

            lines.push("  By status:".to_owned());
            lines.extend(
                self.by_status
                    .iter()
                    .map(|(status, count)| format!("    {status}: {count}")),
            );

            lines.push(format!(
                "  Used: {}, never used: {unused}",
                total.saturating_sub(*unused)
            ));
        }

        lines
    }
}

/// The statistics of several courses, with their grand totals
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteStatistics {
    pub courses: Vec<CourseStatistics>,
    pub totals: QuestionStatistics,
}

impl SiteStatistics {
    fn from_courses(courses: Vec<CourseStatistics>) -> Self {
        let mut totals = QuestionStatistics::default();
        for course in &courses {
            totals.accumulate(&course.stats);
        }

        Self { courses, totals }
    }

    /// Format the statistics for display, one line per course
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .courses
            .iter()
            .map(|entry| {
                format!(
                    "{} (ID: {}): {} questions, {} unused, {} duplicates",
                    entry.course.full_name,
                    entry.course.id,
                    entry.stats.total,
                    entry.stats.unused,
                    entry.stats.duplicates,
                )
            })
            .collect();

        lines.push(format!(
            "Total: {} questions, {} unused, {} duplicates, {} empty categories",
            self.totals.total,
            self.totals.unused,
            self.totals.duplicates,
            self.totals.empty_categories,
        ));

        lines
    }
}

async fn collect(
    repo: &mut BoxRepository,
    course: Course,
    verbose: bool,
) -> Result<Option<CourseStatistics>, RepositoryError> {
    let Some(context_id) = repo.course().context_id(course.id).await? else {
        return Ok(None);
    };

    let stats = repo.question().statistics(context_id).await?;
    let (by_qtype, by_status) = if verbose {
        let by_qtype = repo.question().count_by_qtype(context_id).await?;
        let by_status = repo.question().count_by_status(context_id).await?;
        (by_qtype, by_status)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(Some(CourseStatistics {
        course,
        stats,
        by_qtype,
        by_status,
    }))
}

/// Compute the statistics of a single course
///
/// # Errors
///
/// Returns [`CleanupError::CourseNotFound`] if the course doesn't exist, or
/// an error if the store failed
#[tracing::instrument(name = "statistics.course", skip(state))]
pub async fn course_statistics(
    state: &State,
    course_id: i64,
    verbose: bool,
) -> Result<CourseStatistics, CleanupError> {
    let stats = async {
        let mut repo = state.repository().await?;
        let course = repo.course().lookup(course_id).await?;
        let stats = match course {
            Some(course) => collect(&mut repo, course, verbose).await?,
            None => None,
        };
        repo.save().await?;
        Ok::<_, RepositoryError>(stats)
    }
    .await
    .into_store_with(|| format!("computing the statistics of course {course_id}"))?;

    stats.ok_or(CleanupError::CourseNotFound(course_id))
}

async fn every_course(state: &State) -> Result<Vec<CourseStatistics>, CleanupError> {
    let site_course_id = state.site_config().site_course_id;

    async {
        let mut repo = state.repository().await?;
        let courses = repo.course().list_except(site_course_id).await?;

        let mut stats = Vec::with_capacity(courses.len());
        for course in courses {
            if let Some(entry) = collect(&mut repo, course, false).await? {
                stats.push(entry);
            }
        }

        repo.save().await?;
        Ok::<_, RepositoryError>(stats)
    }
    .await
    .into_store("computing the statistics of every course")
}

/// The `count` courses with the most questions
///
/// # Errors
///
/// Returns an error if the store failed
#[tracing::instrument(name = "statistics.top_courses", skip(state))]
pub async fn top_courses(state: &State, count: usize) -> Result<SiteStatistics, CleanupError> {
    let mut courses = every_course(state).await?;
    courses.sort_by(|a, b| {
        b.stats
            .total
            .cmp(&a.stats.total)
            .then(a.course.id.cmp(&b.course.id))
    });
    courses.truncate(count);

    Ok(SiteStatistics::from_courses(courses))
}

/// The statistics of every course, with the grand totals
///
/// # Errors
///
/// Returns an error if the store failed
#[tracing::instrument(name = "statistics.all_courses", skip(state))]
pub async fn all_courses(state: &State) -> Result<SiteStatistics, CleanupError> {
    let courses = every_course(state).await?;
    Ok(SiteStatistics::from_courses(courses))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use janitor_data_model::QuestionStatus;

    use super::*;
    use crate::test_utils::TestState;

    fn populate(test: &TestState) {
        let biology = test.store.add_course(2, "Biology");
        let category = test.store.add_category(biology, "Default", "a");
        test.store.add_category(biology, "Spare", "b");
        test.store
            .add_question(category, "Q1", "multichoice", 100, QuestionStatus::Ready);
        test.store
            .add_question(category, "Q1", "multichoice", 200, QuestionStatus::Ready);
        let used = test
            .store
            .add_question(category, "Q2", "truefalse", 300, QuestionStatus::Hidden);
        let quiz = test.store.add_quiz(2, "Week 1");
        test.store.add_attempt(quiz, 1000, &[used]);

        let chemistry = test.store.add_course(3, "Chemistry");
        let category = test.store.add_category(chemistry, "Default", "c");
        test.store
            .add_question(category, "Acids", "essay", 100, QuestionStatus::Ready);
    }

    #[tokio::test]
    async fn single_course() {
        let test = TestState::new();
        populate(&test);

        let stats = course_statistics(&test.state, 2, true).await.unwrap();
        assert_eq!(stats.stats.total, 3);
        assert_eq!(stats.stats.unused, 2);
        assert_eq!(stats.stats.duplicates, 1);
        assert_eq!(stats.stats.empty_categories, 1);

        let lines = stats.render(true);
        assert_eq!(lines[0], "Course: Biology (ID: 2)");
        assert!(lines.contains(&"  Total questions: 3".to_owned()));
        assert!(lines.contains(&"  Used: 1, never used: 2".to_owned()));

        let terse = course_statistics(&test.state, 2, false).await.unwrap();
        assert!(terse.by_qtype.is_empty());
        assert_eq!(terse.render(false).len(), 6);
    }

    #[tokio::test]
    async fn site_wide() {
        let test = TestState::new();
        populate(&test);

        let top = top_courses(&test.state, 1).await.unwrap();
        assert_eq!(top.courses.len(), 1);
        assert_eq!(top.courses[0].course.id, 2);

        let all = all_courses(&test.state).await.unwrap();
        assert_eq!(all.courses.len(), 2);
        assert_eq!(all.totals.total, 4);
        assert_eq!(
            all.render().last().map(String::as_str),
            Some("Total: 4 questions, 3 unused, 1 duplicates, 1 empty categories")
        );
    }

    #[tokio::test]
    async fn unknown_course() {
        let test = TestState::new();
        let result = course_statistics(&test.state, 99, false).await;
        assert_matches!(result, Err(CleanupError::CourseNotFound(99)));
    }
}
