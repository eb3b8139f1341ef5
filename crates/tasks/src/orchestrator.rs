// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Run the cleanup steps over one or many courses

use std::collections::BTreeMap;

use janitor_data_model::{Course, CourseScope};
use janitor_storage::{RepositoryAccess, RepositoryError};
use serde::Serialize;

use crate::{
    CleanupError, Deadline, ProgressReporter, ProgressSink, State, Step, Summary,
    error::IntoStore,
};

/// The courses a run goes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every course, except the site course
    AllCourses,

    /// A single course, which has to exist
    Course(i64),

    /// A list of courses. The ones which don't exist are skipped.
    Courses(Vec<i64>),

    /// Every context of the site, in a single pass per step. Duplicate
    /// questions are still grouped within each course.
    Site,
}

impl From<CourseScope> for Target {
    fn from(value: CourseScope) -> Self {
        match value {
            CourseScope::All => Self::AllCourses,
            CourseScope::Course(id) => Self::Course(id),
        }
    }
}

/// Where a run is at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    RunningStep(Step),
    Completed,
    HaltedByDeadline,
}

/// What a run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The counters of each step, over all the courses
    pub steps: BTreeMap<Step, Summary>,

    /// How many courses went through every step
    pub courses_processed: usize,

    pub halted_by_deadline: bool,

    /// The state the run ended in
    pub state: RunState,
}

impl RunSummary {
    fn new(steps: &[Step]) -> Self {
        Self {
            steps: steps.iter().map(|step| (*step, Summary::default())).collect(),
            courses_processed: 0,
            halted_by_deadline: false,
            state: RunState::Idle,
        }
    }

    /// The counters of a step
    #[must_use]
    pub fn step(&self, step: Step) -> Summary {
        self.steps.get(&step).copied().unwrap_or_default()
    }

    /// The number of deleted items over all the steps
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.steps.values().map(|summary| summary.deleted).sum()
    }

    /// The number of skipped items over all the steps
    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.steps.values().map(|summary| summary.skipped).sum()
    }
}

/// Runs the cleanup steps, in order, on each course of a [`Target`]
pub struct CleanupOrchestrator<'a> {
    state: &'a State,
    deadline: Deadline,
    steps: Vec<Step>,
    verbose: bool,
    run_state: RunState,
}

impl<'a> CleanupOrchestrator<'a> {
    /// Run every step, with the verbosity of the site configuration
    #[must_use]
    pub fn new(state: &'a State, deadline: Deadline) -> Self {
        Self {
            state,
            deadline,
            steps: Step::ALL.to_vec(),
            verbose: state.site_config().verbose,
            run_state: RunState::Idle,
        }
    }

    /// Only run the given steps. They still run in their usual order.
    #[must_use]
    pub fn with_steps(mut self, steps: &[Step]) -> Self {
        self.steps = Step::ALL
            .into_iter()
            .filter(|step| steps.contains(step))
            .collect();
        self
    }

    /// Output a line for every candidate
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Where the run is at
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    async fn resolve(&self, target: Target) -> Result<Vec<i64>, CleanupError> {
        match target {
            Target::AllCourses => {
                let site_course_id = self.state.site_config().site_course_id;
                let courses = async {
                    let mut repo = self.state.repository().await?;
                    let courses = repo.course().list_except(site_course_id).await?;
                    repo.save().await?;
                    Ok::<_, RepositoryError>(courses)
                }
                .await
                .into_store("listing courses")?;

                Ok(courses.into_iter().map(|course| course.id).collect())
            }

            Target::Course(id) => {
                if self.course(id).await?.is_none() {
                    return Err(CleanupError::CourseNotFound(id));
                }
                Ok(vec![id])
            }

            Target::Courses(ids) => Ok(ids),

            Target::Site => Ok(Vec::new()),
        }
    }

    async fn course(&self, id: i64) -> Result<Option<(Course, i64)>, CleanupError> {
        async {
            let mut repo = self.state.repository().await?;
            let course = repo.course().lookup(id).await?;
            let context_id = repo.course().context_id(id).await?;
            repo.save().await?;
            Ok::<_, RepositoryError>(course.zip(context_id))
        }
        .await
        .into_store_with(|| format!("looking up course {id}"))
    }

    /// Run every step on a context, or on the whole site, until the deadline
    async fn run_steps(
        &mut self,
        context_id: Option<i64>,
        sink: &mut dyn ProgressSink,
        summary: &mut RunSummary,
    ) -> Result<(), CleanupError> {
        for step in self.steps.clone() {
            self.run_state = RunState::RunningStep(step);
            sink.output(&format!("{}:", step.label()));

            let mut reporter = ProgressReporter::new(&mut *sink, self.verbose);
            let halted = step
                .run(self.state, context_id, &self.deadline, &mut reporter)
                .await?;
            let step_summary = reporter.finish();

            tracing::info!(
                context.id = context_id,
                step = %step,
                deleted = step_summary.deleted,
                skipped = step_summary.skipped,
                "Step done"
            );
            summary
                .steps
                .entry(step)
                .or_default()
                .accumulate(&step_summary);

            if halted || self.deadline.is_reached() {
                summary.halted_by_deadline = true;
                break;
            }
        }

        Ok(())
    }

    /// Run the steps on every course of the target.
    ///
    /// Reaching the deadline is not an error: the summary says the run was
    /// halted, and has the counters of what was done until then.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError::CourseNotFound`] if a single course was
    /// targeted and doesn't exist, and an error if the store fails outside of
    /// the processing of a single candidate.
    #[tracing::instrument(name = "cleanup.run", skip_all)]
    pub async fn run(
        &mut self,
        target: Target,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunSummary, CleanupError> {
        let site_wide = target == Target::Site;
        let course_ids = self.resolve(target).await?;
        let mut summary = RunSummary::new(&self.steps);

        if site_wide {
            sink.output("Processing the whole site");
            self.run_steps(None, sink, &mut summary).await?;
        }

        for course_id in course_ids {
            let Some((course, context_id)) = self.course(course_id).await? else {
                tracing::info!(course.id = course_id, "Course no longer exists, skipping");
                sink.output(&format!("Course {course_id} no longer exists, skipping"));
                continue;
            };

            sink.output(&format!(
                "Processing course: {} (ID: {})",
                course.full_name, course.id
            ));

            self.run_steps(Some(context_id), sink, &mut summary).await?;
            if summary.halted_by_deadline {
                break;
            }

            summary.courses_processed += 1;
        }

        if summary.halted_by_deadline {
            self.run_state = RunState::HaltedByDeadline;
            sink.output("Operation stopped due to time limit");
        } else {
            self.run_state = RunState::Completed;
        }

        let prefix = if summary.halted_by_deadline {
            ""
        } else {
            "Cleanup complete. "
        };
        if site_wide {
            sink.output(&format!(
                "{prefix}Total deleted: {} items",
                summary.total_deleted()
            ));
        } else {
            sink.output(&format!(
                "{prefix}Processed {} course(s). Total deleted: {} items",
                summary.courses_processed,
                summary.total_deleted()
            ));
        }

        summary.state = self.run_state;
        sink.finished();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;
    use janitor_data_model::{QuestionStatus, TOP_CATEGORY_NAME};
    use janitor_storage_memory::Operation;

    use super::*;
    use crate::{BufferSink, test_utils::TestState};

    async fn run_steps(test: &TestState, steps: &[Step], target: Target) -> (RunSummary, Vec<String>) {
        let mut sink = BufferSink::new();
        let summary = CleanupOrchestrator::new(&test.state, test.unlimited())
            .with_steps(steps)
            .run(target, &mut sink)
            .await
            .unwrap();
        assert!(sink.is_finished());
        (summary, sink.lines())
    }

    #[tokio::test]
    async fn duplicate_questions_keep_the_oldest() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let q1 = test
            .store
            .add_question(category, "Q1", "multichoice", 100, QuestionStatus::Ready);
        let q1_copy = test
            .store
            .add_question(category, "Q1", "multichoice", 200, QuestionStatus::Ready);
        let q2 = test
            .store
            .add_question(category, "Q2", "multichoice", 150, QuestionStatus::Ready);

        let (summary, lines) =
            run_steps(&test, &[Step::DuplicateQuestions], Target::Course(2)).await;

        assert!(test.store.has_question(q1));
        assert!(!test.store.has_question(q1_copy));
        assert!(test.store.has_question(q2));
        assert_eq!(summary.step(Step::DuplicateQuestions).deleted, 1);
        assert_eq!(summary.courses_processed, 1);
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(lines[0], "Processing course: Biology (ID: 2)");
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Cleanup complete. Processed 1 course(s). Total deleted: 1 items")
        );
    }

    #[tokio::test]
    async fn one_survivor_and_idempotent() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let oldest = test
            .store
            .add_question(category, "Cell", "truefalse", 100, QuestionStatus::Ready);
        for created_at in [300, 200] {
            test.store
                .add_question(category, "Cell", "truefalse", created_at, QuestionStatus::Ready);
        }

        let (summary, _) = run_steps(&test, &[Step::DuplicateQuestions], Target::AllCourses).await;
        assert_eq!(summary.step(Step::DuplicateQuestions).deleted, 2);
        assert_eq!(test.store.question_ids(), vec![oldest]);

        let operations = test.store.operations().len();
        let (summary, _) = run_steps(&test, &[Step::DuplicateQuestions], Target::AllCourses).await;
        assert_eq!(summary.total_deleted(), 0);
        assert_eq!(summary.total_skipped(), 0);
        assert_eq!(test.store.operations().len(), operations);
        assert_eq!(test.store.question_ids(), vec![oldest]);
    }

    #[tokio::test]
    async fn used_duplicates_are_kept() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let q1 = test
            .store
            .add_question(category, "Q1", "multichoice", 100, QuestionStatus::Ready);
        let q1_copy = test
            .store
            .add_question(category, "Q1", "multichoice", 200, QuestionStatus::Ready);
        let quiz = test.store.add_quiz(2, "Week 1");
        test.store.add_attempt(quiz, 1000, &[q1_copy]);

        let (summary, _) = run_steps(&test, &[Step::DuplicateQuestions], Target::Course(2)).await;

        assert!(test.store.has_question(q1));
        assert!(test.store.has_question(q1_copy));
        assert_eq!(summary.step(Step::DuplicateQuestions).deleted, 0);
        assert_eq!(summary.step(Step::DuplicateQuestions).skipped, 1);
        assert!(
            !test
                .store
                .operations()
                .contains(&Operation::DeleteQuestion(q1_copy))
        );
    }

    #[tokio::test]
    async fn stops_at_the_deadline() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        for i in 0..5 {
            test.store.add_question(
                category,
                &format!("Hidden {i}"),
                "essay",
                100 + i,
                QuestionStatus::Hidden,
            );
        }
        test.store
            .tick_on_mutation(Arc::clone(&test.clock), Duration::seconds(10));

        let deadline = Deadline::after(test.state.shared_clock(), Some(Duration::seconds(25)));
        let mut sink = BufferSink::new();
        let mut orchestrator =
            CleanupOrchestrator::new(&test.state, deadline).with_steps(&[Step::UnusedQuestions]);
        let summary = orchestrator
            .run(Target::Course(2), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.step(Step::UnusedQuestions).deleted, 3);
        assert_eq!(test.store.question_ids().len(), 2);
        assert!(summary.halted_by_deadline);
        assert_eq!(summary.courses_processed, 0);
        assert_eq!(orchestrator.run_state(), RunState::HaltedByDeadline);

        let lines = sink.lines();
        assert!(lines.contains(&"Operation stopped due to time limit".to_owned()));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Processed 0 course(s). Total deleted: 3 items")
        );

        // A run without a time limit finishes the job
        let (summary, _) = run_steps(&test, &[Step::UnusedQuestions], Target::Course(2)).await;
        assert_eq!(summary.step(Step::UnusedQuestions).deleted, 2);
        assert!(test.store.question_ids().is_empty());
        assert_eq!(summary.state, RunState::Completed);
    }

    #[tokio::test]
    async fn a_second_full_run_changes_nothing() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let top = test.store.add_category(context_id, TOP_CATEGORY_NAME, "t");
        let default = test.store.add_subcategory(top, "Default", "d").unwrap();
        let default_copy = test.store.add_subcategory(top, "Default", "e").unwrap();
        let spare = test.store.add_subcategory(top, "Spare", "s").unwrap();
        let cell = test
            .store
            .add_question(default, "Cell", "truefalse", 100, QuestionStatus::Ready);
        let cell_copy = test
            .store
            .add_question(default, "Cell", "truefalse", 200, QuestionStatus::Ready);
        let hidden = test
            .store
            .add_question(default, "Hidden", "essay", 100, QuestionStatus::Hidden);

        let (summary, _) = run_steps(&test, &Step::ALL, Target::AllCourses).await;
        for step in Step::ALL {
            assert_eq!(summary.step(step).deleted, 1, "{step}");
        }
        assert_eq!(test.store.question_ids(), vec![cell]);
        assert_eq!(test.store.category_ids(), vec![top, default]);
        for id in [cell_copy, hidden] {
            assert!(!test.store.has_question(id));
        }
        for id in [default_copy, spare] {
            assert!(!test.store.has_category(id));
        }

        let operations = test.store.operations();
        let (summary, _) = run_steps(&test, &Step::ALL, Target::AllCourses).await;
        assert_eq!(summary.total_deleted(), 0);
        assert_eq!(summary.courses_processed, 1);
        assert_eq!(test.store.operations(), operations);
        assert_eq!(test.store.question_ids(), vec![cell]);
        assert_eq!(test.store.category_ids(), vec![top, default]);
    }

    #[tokio::test]
    async fn site_wide_category_steps() {
        let test = TestState::new();
        let course_context = test.store.add_course(2, "Biology");
        let spare = test.store.add_category(course_context, "Spare", "s");
        // The context of an activity, not of any course
        let imported = test.store.add_category(900, "Imported", "a");
        let imported_copy = test.store.add_category(900, "Imported", "b");

        let (summary, _) =
            run_steps(&test, &[Step::DuplicateCategories], Target::AllCourses).await;
        assert_eq!(summary.total_deleted(), 0);
        assert!(test.store.has_category(imported_copy));

        let (summary, lines) = run_steps(&test, &[Step::DuplicateCategories], Target::Site).await;
        assert!(test.store.has_category(imported));
        assert!(!test.store.has_category(imported_copy));
        assert!(test.store.has_category(spare));
        assert_eq!(summary.step(Step::DuplicateCategories).deleted, 1);
        assert_eq!(summary.courses_processed, 0);
        assert_eq!(lines[0], "Processing the whole site");
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Cleanup complete. Total deleted: 1 items")
        );

        let (summary, _) = run_steps(&test, &[Step::EmptyCategories], Target::Site).await;
        assert!(!test.store.has_category(imported));
        assert!(!test.store.has_category(spare));
        assert_eq!(summary.step(Step::EmptyCategories).deleted, 2);
    }

    #[tokio::test]
    async fn site_wide_duplicate_questions_stay_within_courses() {
        let test = TestState::new();
        let biology = test.store.add_course(2, "Biology");
        let chemistry = test.store.add_course(3, "Chemistry");
        let in_biology = test.store.add_category(biology, "Default", "a");
        let in_chemistry = test.store.add_category(chemistry, "Default", "a");
        let cell = test
            .store
            .add_question(in_biology, "Cell", "essay", 100, QuestionStatus::Ready);
        let cell_copy = test
            .store
            .add_question(in_biology, "Cell", "essay", 200, QuestionStatus::Ready);
        let other_cell = test
            .store
            .add_question(in_chemistry, "Cell", "essay", 300, QuestionStatus::Ready);

        let (summary, _) = run_steps(&test, &Step::ALL, Target::Site).await;

        assert!(test.store.has_question(cell));
        assert!(!test.store.has_question(cell_copy));
        assert!(test.store.has_question(other_cell));
        assert_eq!(summary.step(Step::DuplicateQuestions).deleted, 1);
    }

    #[tokio::test]
    async fn parents_of_filled_categories_are_kept() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let chapters = test.store.add_category(context_id, "Chapters", "p");
        let chapter = test
            .store
            .add_subcategory(chapters, "Chapter 1", "c")
            .unwrap();
        test.store
            .add_question(chapter, "Q1", "essay", 100, QuestionStatus::Ready);
        let old = test.store.add_category(context_id, "Old", "o");
        let old_chapter = test.store.add_subcategory(old, "Old 1", "o1").unwrap();

        let (summary, _) = run_steps(&test, &[Step::EmptyCategories], Target::Course(2)).await;

        assert!(test.store.has_category(chapters));
        assert!(test.store.has_category(chapter));
        assert!(!test.store.has_category(old));
        assert!(!test.store.has_category(old_chapter));
        assert_eq!(summary.step(Step::EmptyCategories).deleted, 2);
        assert_eq!(summary.step(Step::EmptyCategories).skipped, 2);
    }

    #[tokio::test]
    async fn pinned_duplicates_are_skipped() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        test.store
            .add_question(category, "Q1", "multichoice", 100, QuestionStatus::Ready);
        let pinned = test
            .store
            .add_question(category, "Q1", "multichoice", 200, QuestionStatus::Ready);
        test.store.add_reference(pinned, None);

        let (summary, _) = run_steps(&test, &[Step::DuplicateQuestions], Target::Course(2)).await;

        assert!(test.store.has_question(pinned));
        assert_eq!(summary.step(Step::DuplicateQuestions).deleted, 0);
        assert_eq!(summary.step(Step::DuplicateQuestions).skipped, 1);
    }

    #[tokio::test]
    async fn categories_are_protected() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let top = test.store.add_category(context_id, TOP_CATEGORY_NAME, "t");
        let filled = test.store.add_category(context_id, "Filled", "f");
        let empty = test.store.add_category(context_id, "Empty", "e");
        test.store
            .add_question(filled, "Q1", "multichoice", 100, QuestionStatus::Ready);

        let (summary, _) = run_steps(&test, &[Step::EmptyCategories], Target::Course(2)).await;

        assert!(test.store.has_category(top));
        assert!(test.store.has_category(filled));
        assert!(!test.store.has_category(empty));
        assert_eq!(summary.step(Step::EmptyCategories).deleted, 1);
        assert!(
            !test
                .store
                .operations()
                .contains(&Operation::DeleteCategory(top))
        );
    }

    #[tokio::test]
    async fn only_unused_hidden_questions_are_deleted() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let unused = test
            .store
            .add_question(category, "Unused", "essay", 100, QuestionStatus::Hidden);
        let attempted = test
            .store
            .add_question(category, "Attempted", "essay", 100, QuestionStatus::Hidden);
        let previewed = test
            .store
            .add_question(category, "Previewed", "essay", 100, QuestionStatus::Hidden);
        let visible = test
            .store
            .add_question(category, "Visible", "essay", 100, QuestionStatus::Ready);
        let quiz = test.store.add_quiz(2, "Week 1");
        test.store.add_attempt(quiz, 1000, &[attempted]);
        test.store.add_preview(previewed);

        let (summary, lines) =
            run_steps(&test, &[Step::UnusedQuestions], Target::Course(2)).await;

        assert!(!test.store.has_question(unused));
        assert!(!test.store.has_question(previewed));
        assert!(test.store.has_question(attempted));
        assert!(test.store.has_question(visible));
        assert_eq!(summary.step(Step::UnusedQuestions).deleted, 2);
        assert!(lines.contains(&"Found 2 unused hidden questions to delete.".to_owned()));
    }

    #[tokio::test]
    async fn store_failures_are_skipped() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let failing = test
            .store
            .add_question(category, "Failing", "essay", 100, QuestionStatus::Hidden);
        let other = test
            .store
            .add_question(category, "Other", "essay", 100, QuestionStatus::Hidden);
        test.store.fail_on(Operation::DeleteQuestion(failing));

        let (summary, _) = run_steps(&test, &[Step::UnusedQuestions], Target::Course(2)).await;

        assert!(test.store.has_question(failing));
        assert!(!test.store.has_question(other));
        assert_eq!(summary.step(Step::UnusedQuestions).deleted, 1);
        assert_eq!(summary.step(Step::UnusedQuestions).skipped, 1);
        assert_eq!(summary.state, RunState::Completed);
    }

    #[tokio::test]
    async fn missing_courses() {
        let test = TestState::new();
        test.store.add_course(2, "Biology");

        let mut sink = BufferSink::new();
        let result = CleanupOrchestrator::new(&test.state, test.unlimited())
            .run(Target::Course(99), &mut sink)
            .await;
        assert_matches!(result, Err(CleanupError::CourseNotFound(99)));

        let (summary, lines) =
            run_steps(&test, &Step::ALL, Target::Courses(vec![2, 99])).await;
        assert_eq!(summary.courses_processed, 1);
        assert!(lines.contains(&"Course 99 no longer exists, skipping".to_owned()));
    }
}
