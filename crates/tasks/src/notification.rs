// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Run a cleanup requested from the queue, and tell the requester about it

use std::fmt::Write;

use async_trait::async_trait;
use janitor_data_model::CourseScope;
use janitor_storage::{RepositoryAccess, RepositoryError, queue::CleanupCourseJob};
use tracing::{info, warn};

use crate::{
    CleanupError, CleanupOrchestrator, Deadline, RunSummary, State, Target, TracingSink,
    queue::{JobContext, JobError, RunnableJob},
};

/// The subject of the message sent once a cleanup is done
pub const SUBJECT: &str = "Question Cleanup Completed";

/// The message sent once a cleanup is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub html: String,
}

impl Notification {
    /// Summarise a run on the given scope, named for humans
    #[must_use]
    pub fn new(scope_name: &str, summary: &RunSummary) -> Self {
        let mut text = format!("Cleanup completed for: {scope_name}\n\nCleanup Results:\n");
        for (step, counters) in &summary.steps {
            let _ = writeln!(
                text,
                "{}: Deleted {}, Skipped {}",
                step.label(),
                counters.deleted,
                counters.skipped
            );
        }
        let _ = write!(
            text,
            "\nTotal: {} items deleted, {} items skipped",
            summary.total_deleted(),
            summary.total_skipped()
        );

        let html = format!("<pre>{}</pre>", v_htmlescape::escape(&text));

        Self { text, html }
    }
}

async fn scope_name(state: &State, scope: CourseScope) -> Result<String, RepositoryError> {
    let CourseScope::Course(id) = scope else {
        return Ok("All courses".to_owned());
    };

    let mut repo = state.repository().await?;
    let course = repo.course().lookup(id).await?;
    repo.save().await?;

    Ok(course.map_or_else(|| format!("Course {id}"), |course| course.full_name))
}

/// Send the summary of a run to a user. Failures are only logged.
#[tracing::instrument(name = "job.cleanup_course.notify", skip(state, summary))]
async fn notify(state: &State, user_id: i64, scope: CourseScope, summary: &RunSummary) {
    let lookup = async {
        let mut repo = state.repository().await?;
        let user = repo.user().lookup(user_id).await?;
        repo.save().await?;
        let name = scope_name(state, scope).await?;
        Ok::<_, RepositoryError>(user.map(|user| (user, name)))
    };

    let (user, name) = match lookup.await {
        Ok(Some(found)) => found,
        Ok(None) => {
            warn!("Requesting user not found, not sending a notification");
            return;
        }
        Err(e) => {
            warn!(
                error = &e as &dyn std::error::Error,
                "Could not look up the requesting user"
            );
            return;
        }
    };

    if !user.can_be_notified() {
        info!("Requesting user has no email address, not sending a notification");
        return;
    }

    let notification = Notification::new(&name, summary);
    if let Err(e) = state
        .notifier()
        .send(&user, SUBJECT, &notification.text, &notification.html)
        .await
    {
        warn!(
            error = &e as &dyn std::error::Error,
            "Could not send the cleanup notification"
        );
    }
}

#[async_trait]
impl RunnableJob for CleanupCourseJob {
    #[tracing::instrument(
        name = "job.cleanup_course",
        fields(course_scope = %self.course_scope()),
        skip_all,
    )]
    async fn run(&self, state: &State, context: JobContext) -> Result<(), JobError> {
        let scope = self.course_scope();
        let deadline = Deadline::after(state.shared_clock(), state.site_config().time_limit)
            .with_cancellation(context.cancellation_token);

        let summary = CleanupOrchestrator::new(state, deadline)
            .run(Target::from(scope), &mut TracingSink)
            .await
            .map_err(|e| match e {
                CleanupError::CourseNotFound(_) => JobError::fail(e),
                e => JobError::retry(e),
            })?;

        info!(
            deleted = summary.total_deleted(),
            skipped = summary.total_skipped(),
            courses = summary.courses_processed,
            halted = summary.halted_by_deadline,
            "Cleanup done"
        );

        if let Some(user_id) = self.requesting_user() {
            notify(state, user_id, scope, &summary).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use janitor_storage::Clock;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{RunState, Step, Summary, test_utils::TestState};

    fn context(test: &TestState) -> JobContext {
        JobContext {
            id: Some(1),
            queue_name: "cleanup_adhoc_task".to_owned(),
            start: test.clock.now(),
            cancellation_token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn notify_the_requesting_user() {
        let test = TestState::new();
        test.store.add_course(2, "Biology");
        test.store.add_user(2, "admin", Some("admin@example.com"));
        test.store.add_user(3, "student", None);

        CleanupCourseJob::new(CourseScope::All, Some(3))
            .run(&test.state, context(&test))
            .await
            .unwrap();
        assert!(test.notifier.sent().is_empty());

        CleanupCourseJob::new(CourseScope::All, None)
            .run(&test.state, context(&test))
            .await
            .unwrap();
        assert!(test.notifier.sent().is_empty());

        CleanupCourseJob::new(CourseScope::All, Some(2))
            .run(&test.state, context(&test))
            .await
            .unwrap();
        let sent = test.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.starts_with("Cleanup completed for: All courses\n"));
        assert!(sent[0].text.ends_with("Total: 0 items deleted, 0 items skipped"));
    }

    #[test]
    fn notification_body() {
        let counters = |deleted, skipped| Summary {
            deleted,
            skipped,
            ..Summary::default()
        };
        let summary = RunSummary {
            steps: BTreeMap::from([
                (Step::DuplicateQuestions, counters(3, 1)),
                (Step::DuplicateCategories, counters(0, 0)),
                (Step::EmptyCategories, counters(2, 1)),
                (Step::UnusedQuestions, counters(5, 0)),
            ]),
            courses_processed: 1,
            halted_by_deadline: false,
            state: RunState::Completed,
        };

        let notification = Notification::new("Biology & Chemistry", &summary);
        insta::assert_snapshot!(notification.text, @r"
        Cleanup completed for: Biology & Chemistry

        Cleanup Results:
        Duplicate Questions: Deleted 3, Skipped 1
        Duplicate Categories: Deleted 0, Skipped 0
        Empty Categories: Deleted 2, Skipped 1
        Unused Questions: Deleted 5, Skipped 0

        Total: 10 items deleted, 2 items skipped
        ");
        assert!(notification.html.starts_with("<pre>Cleanup completed for: Biology &amp; Chemistry"));
        assert!(notification.html.ends_with("</pre>"));
    }
}
