// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The question bank cleanup engine, and the worker running it in the
//! background.
//!
//! Everything in here talks to the store through the repository traits of
//! [`janitor_storage`], and gets the current time from an injected
//! [`Clock`]. Each mutation runs in its own transaction, so an interrupted
//! run keeps everything it already did.

#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use janitor_data_model::SiteConfig;
use janitor_email::Notifier;
use janitor_storage::{
    BoxRepository, BoxRepositoryFactory, Clock, RepositoryError, RepositoryFactory,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod attempts;
mod cleanup;
mod deadline;
mod error;
mod grouper;
mod maintenance;
mod notification;
mod orchestrator;
mod policy;
mod progress;
mod queue;
mod repair;
mod scanner;
mod statistics;
#[cfg(test)]
mod test_utils;

pub use self::{
    attempts::{AttemptScope, purge_attempts},
    cleanup::Step,
    deadline::Deadline,
    error::CleanupError,
    maintenance::{MaintenanceSummary, ScheduledMaintenanceJob, run_maintenance},
    notification::{Notification, SUBJECT as NOTIFICATION_SUBJECT},
    orchestrator::{CleanupOrchestrator, RunState, RunSummary, Target},
    policy::{Candidate, DefaultsRegistry, Mode, Outcome, SkipReason},
    progress::{
        BufferSink, NullSink, ProgressReporter, ProgressSink, StdoutSink, Summary, TracingSink,
    },
    queue::{JobContext, JobError, QueueRunnerError, QueueWorker, RunnableJob},
    repair::{RepairSummary, repair},
    scanner::{PAGE_SIZE, PageSource, PagedScanner},
    statistics::{CourseStatistics, SiteStatistics, all_courses, course_statistics, top_courses},
};

/// Everything the engine needs to run
#[derive(Clone)]
pub struct State {
    repository_factory: Arc<dyn RepositoryFactory + Send + Sync>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    site_config: SiteConfig,
    registry: Arc<DefaultsRegistry>,
}

impl State {
    /// Create a new [`State`], with the default options registry
    #[must_use]
    pub fn new(
        repository_factory: BoxRepositoryFactory,
        clock: impl Clock + 'static,
        notifier: impl Notifier + 'static,
        site_config: SiteConfig,
    ) -> Self {
        Self {
            repository_factory: Arc::from(repository_factory),
            clock: Arc::new(clock),
            notifier: Arc::new(notifier),
            site_config,
            registry: Arc::new(DefaultsRegistry::default()),
        }
    }

    /// Replace the site configuration
    #[must_use]
    pub fn with_site_config(mut self, site_config: SiteConfig) -> Self {
        self.site_config = site_config;
        self
    }

    /// The clock used by the engine
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// A shared handle on the clock, for [`Deadline`]s
    #[must_use]
    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The notifier used once a background cleanup is done
    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// The site configuration
    #[must_use]
    pub fn site_config(&self) -> &SiteConfig {
        &self.site_config
    }

    /// The default options of each question type
    #[must_use]
    pub fn registry(&self) -> &DefaultsRegistry {
        &self.registry
    }

    /// Open a new repository, in its own transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not reachable
    pub async fn repository(&self) -> Result<BoxRepository, RepositoryError> {
        self.repository_factory.create().await
    }
}

/// Initialise the worker, without running it.
///
/// This is mostly useful for tests.
///
/// # Errors
///
/// Returns an error if the maintenance schedule is not a valid cron
/// expression.
pub fn init(
    state: State,
    maintenance_schedule: &str,
    cancellation_token: CancellationToken,
) -> Result<QueueWorker, QueueRunnerError> {
    let mut worker = QueueWorker::new(state, cancellation_token);

    worker
        .register_handler::<janitor_storage::queue::CleanupCourseJob>()
        .add_schedule(
            "scheduled-maintenance",
            maintenance_schedule.parse()?,
            ScheduledMaintenanceJob,
        );

    Ok(worker)
}

/// Initialise the worker and run it.
///
/// # Errors
///
/// Returns an error if the maintenance schedule is not a valid cron
/// expression.
pub fn init_and_run(
    state: State,
    maintenance_schedule: &str,
    cancellation_token: CancellationToken,
    task_tracker: &TaskTracker,
) -> Result<(), QueueRunnerError> {
    let worker = init(state, maintenance_schedule, cancellation_token)?;

    task_tracker.spawn(worker.run());

    Ok(())
}
