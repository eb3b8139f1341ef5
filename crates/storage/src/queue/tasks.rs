// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use janitor_data_model::CourseScope;
use serde::{Deserialize, Serialize};

use super::{InsertableJob, QueueJobRepository};
use crate::Clock;

/// The result of [`CleanupCourseJob::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new job was scheduled, with this ID
    Scheduled(i64),

    /// A job for the same scope is already waiting or running, with this ID
    AlreadyPending(i64),
}

/// A job to run the full question bank cleanup on a course, or on all
/// courses.
///
/// The payload uses the same shape as the LMS ad-hoc task it replaces, where
/// course `0` means all courses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CleanupCourseJob {
    courseid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    userid: Option<i64>,
}

impl CleanupCourseJob {
    /// Create a new job to clean up the given scope, notifying the given user
    /// when it's done
    #[must_use]
    pub fn new(course_scope: CourseScope, requesting_user: Option<i64>) -> Self {
        Self {
            courseid: course_scope.course_id().unwrap_or(0),
            userid: requesting_user,
        }
    }

    /// The scope to clean up
    #[must_use]
    pub fn course_scope(&self) -> CourseScope {
        match self.courseid {
            id if id > 0 => CourseScope::Course(id),
            _ => CourseScope::All,
        }
    }

    /// The user to notify once the cleanup is done
    #[must_use]
    pub fn requesting_user(&self) -> Option<i64> {
        self.userid.filter(|id| *id > 0)
    }

    /// Schedule this job, unless a job for the same scope is already pending
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository fails, or if the job
    /// could not be serialized.
    pub async fn enqueue<R>(self, repo: &mut R, clock: &dyn Clock) -> Result<Enqueued, R::Error>
    where
        R: QueueJobRepository + ?Sized,
        R::Error: From<serde_json::Error>,
    {
        let scope = self.course_scope();
        if let Some(job) = repo.find_pending(Self::QUEUE_NAME, scope).await? {
            tracing::info!(queue_job.id = job.id, course_scope = %scope, "A cleanup is already pending");
            return Ok(Enqueued::AlreadyPending(job.id));
        }

        let payload = serde_json::to_value(&self)?;
        let id = repo.schedule(clock, Self::QUEUE_NAME, payload).await?;
        Ok(Enqueued::Scheduled(id))
    }
}

impl InsertableJob for CleanupCourseJob {
    const QUEUE_NAME: &'static str = "cleanup_adhoc_task";

    fn course_scope(&self) -> CourseScope {
        CleanupCourseJob::course_scope(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let job = CleanupCourseJob::new(CourseScope::Course(5), Some(2));
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            serde_json::json!({"courseid": 5, "userid": 2})
        );

        let job: CleanupCourseJob = serde_json::from_value(serde_json::json!({"courseid": 0})).unwrap();
        assert_eq!(job.course_scope(), CourseScope::All);
        assert_eq!(job.requesting_user(), None);
    }
}
