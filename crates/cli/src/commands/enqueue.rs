// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use janitor_data_model::CourseScope;
use janitor_storage::{
    RepositoryAccess,
    queue::{CleanupCourseJob, Enqueued},
};
use janitor_tasks::{ProgressSink, StdoutSink};
use tracing::{Instrument, info, info_span};

use crate::util::{load_config, state_from_config};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// The course to clean up, or `all` for every course but the site course
    #[arg(long)]
    course_scope: CourseScope,

    /// The user to notify once the cleanup is done
    #[arg(long)]
    user_id: Option<i64>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.enqueue", scope = %self.course_scope);

        async move {
            let config = load_config(figment)?;
            let state = state_from_config(&config).await?;
            let mut sink = StdoutSink;

            let mut repo = state.repository().await?;

            if let Some(course_id) = self.course_scope.course_id() {
                let course = repo
                    .course()
                    .lookup(course_id)
                    .await
                    .context("could not look up the course")?;

                if course.is_none() {
                    repo.cancel().await?;
                    anyhow::bail!("course {course_id} does not exist");
                }
            }

            let enqueued = CleanupCourseJob::new(self.course_scope, self.user_id)
                .enqueue(&mut *repo.queue_job(), state.clock())
                .await?;
            repo.save().await?;

            match enqueued {
                Enqueued::Scheduled(id) => {
                    info!(queue_job.id = id, "Cleanup scheduled");
                    sink.output(&format!(
                        "Cleanup scheduled for course scope {} (task {id})",
                        self.course_scope
                    ));
                    Ok(ExitCode::SUCCESS)
                }

                Enqueued::AlreadyPending(id) => {
                    sink.output(&format!(
                        "A cleanup is already pending for course scope {} (task {id})",
                        self.course_scope
                    ));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_required() {
        let opts =
            Options::try_parse_from(["enqueue", "--course-scope", "all", "--user-id", "2"])
                .unwrap();
        assert_eq!(opts.course_scope, CourseScope::All);
        assert_eq!(opts.user_id, Some(2));

        assert!(Options::try_parse_from(["enqueue"]).is_err());
    }
}
