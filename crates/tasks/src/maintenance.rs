// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    AttemptScope, CleanupError, Deadline, ProgressReporter, ProgressSink, State, Summary,
    TracingSink, cleanup,
    queue::{JobContext, JobError, RunnableJob},
    purge_attempts,
};

/// The recurring maintenance: purge old quiz attempts, then unused hidden
/// questions if enabled
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct ScheduledMaintenanceJob;

/// What the maintenance did
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceSummary {
    /// `None` if the attempt purge is disabled
    pub attempts: Option<Summary>,

    /// `None` if the unused questions cleanup is disabled, or if the deadline
    /// was reached before it started
    pub unused_questions: Option<Summary>,

    pub halted_by_deadline: bool,
}

/// Run the scheduled maintenance once, both steps sharing the deadline
///
/// # Errors
///
/// Returns an error if the store failed
#[tracing::instrument(name = "cleanup.maintenance", skip_all)]
pub async fn run_maintenance(
    state: &State,
    deadline: &Deadline,
    sink: &mut dyn ProgressSink,
) -> Result<MaintenanceSummary, CleanupError> {
    let config = state.site_config().clone();
    let mut summary = MaintenanceSummary::default();

    if let Some(lifetime) = config.attempt_lifetime {
        let cutoff = state.clock().now() - lifetime;
        let attempts =
            purge_attempts(state, cutoff, AttemptScope::All, deadline, &mut *sink).await?;
        summary.attempts = Some(attempts);
    }

    if config.delete_unused_questions && !deadline.is_reached() {
        let mut reporter = ProgressReporter::new(&mut *sink, config.verbose);
        let halted = cleanup::unused_questions(state, None, deadline, &mut reporter).await?;
        summary.unused_questions = Some(reporter.finish());
        if halted {
            sink.output("Operation stopped due to time limit");
        }
    }

    summary.halted_by_deadline = deadline.is_reached();

    Ok(summary)
}

#[async_trait]
impl RunnableJob for ScheduledMaintenanceJob {
    #[tracing::instrument(name = "job.scheduled_maintenance", skip_all)]
    async fn run(&self, state: &State, context: JobContext) -> Result<(), JobError> {
        let config = state.site_config();
        if config.attempt_lifetime.is_none() && !config.delete_unused_questions {
            // Nothing is enabled
            return Ok(());
        }

        let deadline = Deadline::after(state.shared_clock(), config.max_execution_time)
            .with_cancellation(context.cancellation_token);

        let summary = run_maintenance(state, &deadline, &mut TracingSink)
            .await
            .map_err(JobError::retry)?;

        info!(
            attempts.deleted = summary.attempts.map(|s| s.deleted),
            questions.deleted = summary.unused_questions.map(|s| s.deleted),
            halted = summary.halted_by_deadline,
            "Scheduled maintenance done"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use janitor_data_model::{QuestionStatus, SiteConfig};
    use janitor_storage::Clock;

    use super::*;
    use crate::{BufferSink, test_utils::TestState};

    #[tokio::test]
    async fn purge_then_delete_unused_questions() {
        let test = TestState::with_site_config(SiteConfig {
            attempt_lifetime: Some(Duration::days(30)),
            delete_unused_questions: true,
            ..SiteConfig::default()
        });
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let hidden = test
            .store
            .add_question(category, "Hidden", "essay", 100, QuestionStatus::Hidden);
        let quiz = test.store.add_quiz(2, "Week 1");

        let now = test.clock.now().timestamp();
        let old = test.store.add_attempt(quiz, now - 60 * 86_400, &[hidden]);
        let recent = test.store.add_attempt(quiz, now - 86_400, &[]);

        let mut sink = BufferSink::new();
        let summary = run_maintenance(&test.state, &test.unlimited(), &mut sink)
            .await
            .unwrap();

        assert!(!test.store.has_attempt(old));
        assert!(test.store.has_attempt(recent));
        // Only used by the purged attempt
        assert!(!test.store.has_question(hidden));
        assert_eq!(summary.attempts.map(|s| s.deleted), Some(1));
        assert_eq!(summary.unused_questions.map(|s| s.deleted), Some(1));
        assert!(!summary.halted_by_deadline);
    }

    #[tokio::test]
    async fn everything_disabled() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let hidden = test
            .store
            .add_question(category, "Hidden", "essay", 100, QuestionStatus::Hidden);

        let mut sink = BufferSink::new();
        let summary = run_maintenance(&test.state, &test.unlimited(), &mut sink)
            .await
            .unwrap();

        assert!(summary.attempts.is_none());
        assert!(summary.unused_questions.is_none());
        assert!(test.store.has_question(hidden));
        assert!(sink.lines().is_empty());
    }
}
