// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with jobs in the job queue

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use janitor_data_model::CourseScope;
use serde::Serialize;

use crate::{Clock, repository_impl};

/// Represents a job in the job queue
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// The ID of the job
    pub id: i64,

    /// The queue on which the job was placed
    pub queue_name: String,

    /// The payload of the job
    pub payload: serde_json::Value,

    /// When the job was scheduled
    pub created_at: DateTime<Utc>,
}

/// A trait that represents a job which can be inserted into a queue
pub trait InsertableJob: Serialize + Send {
    /// The name of the queue this job belongs to
    const QUEUE_NAME: &'static str;

    /// The courses this job operates on. At most one job per scope can be
    /// pending at a time.
    fn course_scope(&self) -> CourseScope;
}

/// A [`QueueJobRepository`] is used to schedule jobs to be executed by a
/// worker.
#[async_trait]
pub trait QueueJobRepository: Send + Sync {
    /// The error type returned by the repository.
    type Error;

    /// Schedule a job to be executed as soon as possible by a worker.
    ///
    /// Returns the ID of the new job.
    ///
    /// # Parameters
    ///
    /// * `clock` - The clock used to generate timestamps
    /// * `queue_name` - The name of the queue to schedule the job on
    /// * `payload` - The payload of the job
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn schedule(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<i64, Self::Error>;

    /// Find a job on the given queue for the given course scope which is
    /// either waiting to be run or running. Jobs which failed and wait for a
    /// retry are not considered.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn find_pending(
        &mut self,
        queue_name: &str,
        course_scope: CourseScope,
    ) -> Result<Option<Job>, Self::Error>;

    /// Reserve jobs from a queue which are due, marking them as started
    ///
    /// # Parameters
    ///
    /// * `clock` - The clock used to generate timestamps
    /// * `queue_name` - The queue to reserve jobs from
    /// * `count` - The maximum number of jobs to reserve
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn reserve(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        count: usize,
    ) -> Result<Vec<Job>, Self::Error>;

    /// Put back in the queue the jobs which were reserved more than `lease`
    /// ago and never marked as completed or failed, for example because the
    /// worker running them died.
    ///
    /// Returns the number of jobs released.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn release_stale(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        lease: Duration,
    ) -> Result<usize, Self::Error>;

    /// Mark a job as completed, removing it from the queue
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn mark_as_completed(&mut self, id: i64) -> Result<(), Self::Error>;

    /// Mark a job as failed. It will be retried later, with an increasing
    /// delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn mark_as_failed(&mut self, clock: &dyn Clock, id: i64) -> Result<(), Self::Error>;
}

repository_impl!(QueueJobRepository:
    async fn schedule(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<i64, Self::Error>;

    async fn find_pending(
        &mut self,
        queue_name: &str,
        course_scope: CourseScope,
    ) -> Result<Option<Job>, Self::Error>;

    async fn reserve(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        count: usize,
    ) -> Result<Vec<Job>, Self::Error>;

    async fn release_stale(
        &mut self,
        clock: &dyn Clock,
        queue_name: &str,
        lease: Duration,
    ) -> Result<usize, Self::Error>;

    async fn mark_as_completed(&mut self, id: i64) -> Result<(), Self::Error>;

    async fn mark_as_failed(&mut self, clock: &dyn Clock, id: i64) -> Result<(), Self::Error>;
);

/// Extension trait for [`QueueJobRepository`] to help adding a job to the queue
/// through the [`InsertableJob`] trait. This isn't in the
/// [`QueueJobRepository`] trait to keep it object safe.
#[async_trait]
pub trait QueueJobRepositoryExt: QueueJobRepository {
    /// Schedule a job to be executed as soon as possible by a worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails, or if the job
    /// could not be serialized.
    async fn schedule_job<J: InsertableJob>(
        &mut self,
        clock: &dyn Clock,
        job: J,
    ) -> Result<i64, Self::Error>;

    /// Find a pending job on the queue of `J` with the same scope as `job`
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails.
    async fn find_pending_job<J: InsertableJob + Sync>(
        &mut self,
        job: &J,
    ) -> Result<Option<Job>, Self::Error>;
}

#[async_trait]
impl<T> QueueJobRepositoryExt for T
where
    T: QueueJobRepository,
    T::Error: From<serde_json::Error>,
{
    #[tracing::instrument(
        name = "db.queue_job.schedule_job",
        fields(
            queue_job.queue_name = J::QUEUE_NAME,
            queue_job.course_scope = %job.course_scope(),
        ),
        skip_all,
    )]
    async fn schedule_job<J: InsertableJob>(
        &mut self,
        clock: &dyn Clock,
        job: J,
    ) -> Result<i64, Self::Error> {
        let payload = serde_json::to_value(job)?;
        self.schedule(clock, J::QUEUE_NAME, payload).await
    }

    async fn find_pending_job<J: InsertableJob + Sync>(
        &mut self,
        job: &J,
    ) -> Result<Option<Job>, Self::Error> {
        self.find_pending(J::QUEUE_NAME, job.course_scope()).await
    }
}
