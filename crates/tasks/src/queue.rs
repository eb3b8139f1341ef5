// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A small job queue worker, polling the store for pending jobs, and running
//! recurring jobs on a cron schedule

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use janitor_storage::{
    RepositoryAccess, RepositoryError,
    queue::{InsertableJob, Job},
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::State;

/// How long the worker sleeps between two ticks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How many jobs of a queue are reserved on each tick
const MAX_JOBS_PER_TICK: usize = 5;

/// After how many hours a reserved job which was never marked as completed
/// or failed goes back in the queue
const RESERVATION_LEASE_HOURS: i64 = 24;

/// What a job knows about its own execution
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The ID of the job, `None` for scheduled jobs, which don't go through
    /// the queue
    pub id: Option<i64>,

    /// The queue or schedule name
    pub queue_name: String,

    /// When the job started
    pub start: DateTime<Utc>,

    /// Cancelled when the worker shuts down
    pub cancellation_token: CancellationToken,
}

/// What to do with a job which failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorDecision {
    /// Run it again later
    Retry,

    /// Drop it
    Fail,
}

impl fmt::Display for JobErrorDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// An error returned by a job
#[derive(Debug, Error)]
#[error("Job failed to run, will {decision}")]
pub struct JobError {
    decision: JobErrorDecision,
    #[source]
    error: anyhow::Error,
}

impl JobError {
    /// The job should be run again later
    pub fn retry<T: Into<anyhow::Error>>(error: T) -> Self {
        Self {
            decision: JobErrorDecision::Retry,
            error: error.into(),
        }
    }

    /// The job can't ever succeed, and should be dropped
    pub fn fail<T: Into<anyhow::Error>>(error: T) -> Self {
        Self {
            decision: JobErrorDecision::Fail,
            error: error.into(),
        }
    }

    /// What the worker does with the job
    #[must_use]
    pub fn decision(&self) -> JobErrorDecision {
        self.decision
    }
}

/// A job the worker knows how to run
#[async_trait]
pub trait RunnableJob: Send + Sync + 'static {
    /// Run the job
    async fn run(&self, state: &State, context: JobContext) -> Result<(), JobError>;

    /// How long the job may run before being interrupted
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// An error which stops the worker
#[derive(Debug, Error)]
pub enum QueueRunnerError {
    #[error("Invalid schedule expression")]
    InvalidSchedule(#[from] cron::error::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

type JobFactory =
    Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn RunnableJob>, serde_json::Error> + Send + Sync>;

struct ScheduleDefinition {
    schedule: Schedule,
    job: Arc<dyn RunnableJob>,
    next_run: Option<DateTime<Utc>>,
}

/// Runs the jobs of the registered queues, and the scheduled jobs
pub struct QueueWorker {
    state: State,
    cancellation_token: CancellationToken,
    factories: BTreeMap<&'static str, JobFactory>,
    schedules: BTreeMap<String, ScheduleDefinition>,
}

impl QueueWorker {
    /// Create a new worker, with no queue nor schedule
    #[must_use]
    pub fn new(state: State, cancellation_token: CancellationToken) -> Self {
        Self {
            state,
            cancellation_token,
            factories: BTreeMap::new(),
            schedules: BTreeMap::new(),
        }
    }

    /// Run the jobs of the queue of `T`
    pub fn register_handler<T>(&mut self) -> &mut Self
    where
        T: RunnableJob + InsertableJob + DeserializeOwned,
    {
        let factory: JobFactory = Arc::new(|payload| {
            let job: T = serde_json::from_value(payload)?;
            Ok(Box::new(job) as Box<dyn RunnableJob>)
        });
        self.factories.insert(T::QUEUE_NAME, factory);
        self
    }

    /// Run `job` in the worker every time the schedule fires
    pub fn add_schedule<T: RunnableJob>(
        &mut self,
        name: &str,
        schedule: Schedule,
        job: T,
    ) -> &mut Self {
        self.schedules.insert(
            name.to_owned(),
            ScheduleDefinition {
                schedule,
                job: Arc::new(job),
                next_run: None,
            },
        );
        self
    }

    /// The queues this worker handles
    pub fn queues(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Run the worker until its cancellation token is cancelled
    pub async fn run(mut self) {
        tracing::info!(
            queues = ?self.factories.keys().collect::<Vec<_>>(),
            schedules = ?self.schedules.keys().collect::<Vec<_>>(),
            "Starting the queue worker"
        );

        loop {
            tokio::select! {
                () = self.cancellation_token.cancelled() => {
                    tracing::info!("Received shutdown signal, stopping the worker");
                    break;
                }
                () = tokio::time::sleep(TICK_INTERVAL) => {}
            }

            let span = tracing::info_span!("worker.tick");
            if let Err(e) = self.tick().instrument(span).await {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    "Failed to process the job queue"
                );
            }
        }
    }

    /// Run the due scheduled jobs, then the pending jobs of every queue
    ///
    /// # Errors
    ///
    /// Returns an error if the store failed
    pub async fn tick(&mut self) -> Result<(), QueueRunnerError> {
        tracing::debug!("Tick");
        self.run_schedules().await;

        let queues: Vec<&'static str> = self.queues().collect();
        for queue_name in queues {
            let mut repo = self.state.repository().await?;
            let released = repo
                .queue_job()
                .release_stale(
                    self.state.clock(),
                    queue_name,
                    chrono::Duration::hours(RESERVATION_LEASE_HOURS),
                )
                .await?;
            if released > 0 {
                tracing::warn!(queue_job.queue_name = queue_name, released, "Released stale jobs");
            }

            let jobs = repo
                .queue_job()
                .reserve(self.state.clock(), queue_name, MAX_JOBS_PER_TICK)
                .await?;
            repo.save().await?;

            for job in jobs {
                let id = job.id;
                if let Err(e) = self.run_job(job).await {
                    tracing::error!(
                        queue_job.id = id,
                        error = &e as &dyn std::error::Error,
                        "Could not record the result of the job, it stays reserved"
                    );
                }
            }
        }

        Ok(())
    }

    async fn run_schedules(&mut self) {
        let now = self.state.clock().now();
        let mut due = Vec::new();
        for (name, definition) in &mut self.schedules {
            match definition.next_run {
                Some(next_run) if next_run <= now => due.push(name.clone()),
                Some(_) => continue,
                None => {}
            }
            definition.next_run = definition.schedule.after(&now).next();
        }

        for name in due {
            let Some(job) = self.schedules.get(&name).map(|d| Arc::clone(&d.job)) else {
                continue;
            };

            let context = self.context(None, &name);
            let span = tracing::info_span!("job.scheduled", job.schedule = %name);
            let result = execute(job.as_ref(), &self.state, context)
                .instrument(span)
                .await;
            if let Err(e) = result {
                tracing::error!(
                    job.schedule = %name,
                    error = &e as &dyn std::error::Error,
                    "Scheduled job failed"
                );
            }
        }
    }

    fn context(&self, id: Option<i64>, queue_name: &str) -> JobContext {
        JobContext {
            id,
            queue_name: queue_name.to_owned(),
            start: self.state.clock().now(),
            cancellation_token: self.cancellation_token.child_token(),
        }
    }

    async fn run_job(&self, job: Job) -> Result<(), QueueRunnerError> {
        let span = tracing::info_span!(
            "job.run",
            queue_job.id = job.id,
            queue_job.queue_name = %job.queue_name,
        );

        async move {
            let Some(factory) = self.factories.get(job.queue_name.as_str()) else {
                tracing::warn!("No handler registered for this queue, leaving the job");
                return Ok(());
            };

            let context = self.context(Some(job.id), &job.queue_name);
            let result = match factory(job.payload) {
                Ok(runnable) => execute(runnable.as_ref(), &self.state, context).await,
                Err(e) => Err(JobError::fail(e)),
            };

            let mut repo = self.state.repository().await?;
            match result {
                Ok(()) => {
                    tracing::info!("Job completed");
                    repo.queue_job().mark_as_completed(job.id).await?;
                }
                Err(e) if e.decision() == JobErrorDecision::Retry => {
                    tracing::warn!(error = &e as &dyn std::error::Error, "Job failed, will retry");
                    repo.queue_job()
                        .mark_as_failed(self.state.clock(), job.id)
                        .await?;
                }
                Err(e) => {
                    tracing::error!(error = &e as &dyn std::error::Error, "Job failed, dropping it");
                    repo.queue_job().mark_as_completed(job.id).await?;
                }
            }
            repo.save().await?;

            Ok(())
        }
        .instrument(span)
        .await
    }
}

async fn execute(job: &dyn RunnableJob, state: &State, context: JobContext) -> Result<(), JobError> {
    let Some(timeout) = job.timeout() else {
        return job.run(state, context).await;
    };

    tokio::time::timeout(timeout, job.run(state, context))
        .await
        .map_err(JobError::retry)?
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use janitor_data_model::{CourseScope, QuestionStatus, SiteConfig};
    use janitor_storage::queue::{CleanupCourseJob, Enqueued};
    use janitor_storage_memory::Operation;

    use super::*;
    use crate::{NOTIFICATION_SUBJECT, test_utils::TestState};

    async fn enqueue(test: &TestState, job: CleanupCourseJob) -> Enqueued {
        let mut repo = test.state.repository().await.unwrap();
        let enqueued = job
            .enqueue(&mut *repo.queue_job(), test.state.clock())
            .await
            .unwrap();
        repo.save().await.unwrap();
        enqueued
    }

    #[tokio::test]
    async fn runs_queued_cleanups() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let hidden = test
            .store
            .add_question(category, "Hidden", "essay", 100, QuestionStatus::Hidden);
        test.store.add_user(2, "admin", Some("admin@example.com"));

        let first = enqueue(&test, CleanupCourseJob::new(CourseScope::Course(2), Some(2))).await;
        assert_matches!(first, Enqueued::Scheduled(_));
        let second = enqueue(&test, CleanupCourseJob::new(CourseScope::Course(2), None)).await;
        assert_matches!(second, Enqueued::AlreadyPending(_));
        assert_eq!(test.store.job_count(), 1);

        let mut worker =
            crate::init(test.state.clone(), "0 0 * * * *", CancellationToken::new()).unwrap();
        worker.tick().await.unwrap();

        assert_eq!(test.store.job_count(), 0);
        assert!(!test.store.has_question(hidden));

        let sent = test.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, 2);
        assert_eq!(sent[0].subject, NOTIFICATION_SUBJECT);
        assert!(sent[0].text.starts_with("Cleanup completed for: Biology\n"));

        // Once done, the same scope can be queued again
        let third = enqueue(&test, CleanupCourseJob::new(CourseScope::Course(2), None)).await;
        assert_matches!(third, Enqueued::Scheduled(_));
    }

    #[tokio::test]
    async fn drops_jobs_on_missing_courses() {
        let test = TestState::new();
        test.store.add_user(2, "admin", Some("admin@example.com"));
        enqueue(&test, CleanupCourseJob::new(CourseScope::Course(99), Some(2))).await;

        let mut worker =
            crate::init(test.state.clone(), "0 0 * * * *", CancellationToken::new()).unwrap();
        worker.tick().await.unwrap();

        assert_eq!(test.store.job_count(), 0);
        assert!(test.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn runs_the_maintenance_on_schedule() {
        let test = TestState::with_site_config(SiteConfig {
            attempt_lifetime: Some(Duration::days(1)),
            ..SiteConfig::default()
        });
        test.store.add_course(2, "Biology");
        let quiz = test.store.add_quiz(2, "Week 1");
        let old = test.store.add_attempt(quiz, 1000, &[]);

        let mut worker =
            crate::init(test.state.clone(), "* * * * * *", CancellationToken::new()).unwrap();

        // The first tick only plans the next run
        worker.tick().await.unwrap();
        assert!(test.store.has_attempt(old));

        test.clock.advance(Duration::seconds(2));
        worker.tick().await.unwrap();
        assert!(!test.store.has_attempt(old));
    }

    #[tokio::test]
    async fn a_failed_bookkeeping_does_not_block_the_batch() {
        let test = TestState::new();
        for (course_id, name) in [(2, "Biology"), (3, "Chemistry")] {
            let context_id = test.store.add_course(course_id, name);
            test.store.add_category(context_id, "Default", "a");
        }

        let Enqueued::Scheduled(first) =
            enqueue(&test, CleanupCourseJob::new(CourseScope::Course(2), None)).await
        else {
            panic!("the first job should be scheduled");
        };
        let Enqueued::Scheduled(second) =
            enqueue(&test, CleanupCourseJob::new(CourseScope::Course(3), None)).await
        else {
            panic!("the second job should be scheduled");
        };
        test.store.fail_on(Operation::CompleteJob(first));

        let mut worker =
            crate::init(test.state.clone(), "0 0 * * * *", CancellationToken::new()).unwrap();
        worker.tick().await.unwrap();

        let completions = |test: &TestState| {
            test.store
                .operations()
                .iter()
                .filter(|operation| **operation == Operation::CompleteJob(first))
                .count()
        };

        // The second job still ran, the first one stays reserved
        assert_eq!(test.store.job_next_run(second), None);
        assert!(test.store.job_reserved(first));
        assert_eq!(completions(&test), 1);
        let pending = enqueue(&test, CleanupCourseJob::new(CourseScope::Course(2), None)).await;
        assert_matches!(pending, Enqueued::AlreadyPending(id) if id == first);

        // It is not picked up again while its lease runs
        worker.tick().await.unwrap();
        assert_eq!(completions(&test), 1);

        // Once the lease expired, it runs again
        test.clock.advance(Duration::hours(25));
        worker.tick().await.unwrap();
        assert_eq!(completions(&test), 2);
    }

    #[test]
    fn invalid_schedule() {
        let test = TestState::new();
        let result = crate::init(test.state, "every hour", CancellationToken::new());
        assert!(matches!(result, Err(QueueRunnerError::InvalidSchedule(_))));
    }

    #[test]
    fn job_error_decision() {
        assert_eq!(
            JobError::retry(anyhow::anyhow!("boom")).decision(),
            JobErrorDecision::Retry
        );
        assert_eq!(
            JobError::fail(anyhow::anyhow!("boom")).decision(),
            JobErrorDecision::Fail
        );
    }
}
