// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use chrono::Duration;
use clap::{Args, Parser};
use figment::Figment;
use janitor_data_model::CourseScope;
use janitor_tasks::{CleanupOrchestrator, Deadline, StdoutSink, Step, Target};
use tracing::{Instrument, info_span};

use crate::util::{load_config, seconds, state_from_config};

/// Which courses to go through, and for how long
#[derive(Args, Debug, Clone, Default)]
pub(super) struct RunArgs {
    /// The course to clean up, or `all` for every course but the site course
    #[arg(long, conflicts_with = "course_ids")]
    pub course_scope: Option<CourseScope>,

    /// A comma-separated list of course IDs. Courses which don't exist are
    /// skipped
    #[arg(long, value_delimiter = ',')]
    pub course_ids: Vec<i64>,

    /// Stop gracefully after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub time_limit: Option<u64>,

    /// Output a line for every processed item
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    /// The targeted courses. Defaults to every course
    pub fn target(&self) -> Target {
        if self.course_ids.is_empty() {
            Target::from(self.course_scope.unwrap_or_default())
        } else {
            Target::Courses(self.course_ids.clone())
        }
    }

    /// The target of a run of the given steps.
    ///
    /// Without a course, a run of only the category or unused question steps
    /// goes over every context of the site, not only the course ones.
    pub fn target_for(&self, steps: &[Step]) -> Target {
        let site_wide = !steps.is_empty() && !steps.contains(&Step::DuplicateQuestions);
        match self.target() {
            Target::AllCourses if site_wide => Target::Site,
            target => target,
        }
    }

    /// The time limit, falling back to the configured one
    pub fn time_limit(&self, configured: Option<Duration>) -> Option<Duration> {
        self.time_limit.and_then(seconds).or(configured)
    }
}

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(flatten)]
    run: RunArgs,
}

impl Options {
    pub async fn run(self, figment: &Figment, steps: &[Step]) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.cleanup", steps = steps.len());

        async move {
            let config = load_config(figment)?;
            let state = state_from_config(&config).await?;
            let site_config = state.site_config();

            let deadline = Deadline::after(
                state.shared_clock(),
                self.run.time_limit(site_config.time_limit),
            );
            let verbose = self.run.verbose || site_config.verbose;

            let summary = CleanupOrchestrator::new(&state, deadline)
                .with_steps(steps)
                .with_verbose(verbose)
                .run(self.run.target_for(steps), &mut StdoutSink)
                .await?;

            tracing::info!(
                courses = summary.courses_processed,
                deleted = summary.total_deleted(),
                skipped = summary.total_skipped(),
                halted_by_deadline = summary.halted_by_deadline,
                "Cleanup finished"
            );

            Ok(ExitCode::SUCCESS)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn defaults_to_every_course() {
        let cli = Cli::try_parse_from(["cleanup"]).unwrap();
        assert_eq!(cli.run.target(), Target::AllCourses);
        assert_eq!(cli.run.time_limit(None), None);
        assert!(!cli.run.verbose);
    }

    #[test]
    fn course_scope() {
        let cli = Cli::try_parse_from(["cleanup", "--course-scope", "3"]).unwrap();
        assert_eq!(cli.run.target(), Target::Course(3));

        let cli = Cli::try_parse_from(["cleanup", "--course-scope", "all"]).unwrap();
        assert_eq!(cli.run.target(), Target::AllCourses);

        assert!(Cli::try_parse_from(["cleanup", "--course-scope", "-2"]).is_err());
    }

    #[test]
    fn single_steps_go_over_the_whole_site() {
        let cli = Cli::try_parse_from(["cleanup"]).unwrap();
        assert_eq!(cli.run.target_for(&Step::ALL), Target::AllCourses);
        assert_eq!(
            cli.run.target_for(&[Step::DuplicateQuestions]),
            Target::AllCourses
        );
        assert_eq!(cli.run.target_for(&[Step::DuplicateCategories]), Target::Site);
        assert_eq!(cli.run.target_for(&[Step::EmptyCategories]), Target::Site);

        let cli = Cli::try_parse_from(["cleanup", "--course-scope", "all"]).unwrap();
        assert_eq!(cli.run.target_for(&[Step::UnusedQuestions]), Target::Site);

        let cli = Cli::try_parse_from(["cleanup", "--course-scope", "3"]).unwrap();
        assert_eq!(
            cli.run.target_for(&[Step::DuplicateCategories]),
            Target::Course(3)
        );
    }

    #[test]
    fn course_list() {
        let cli = Cli::try_parse_from(["cleanup", "--course-ids", "2,3,5", "--verbose"]).unwrap();
        assert_eq!(cli.run.target(), Target::Courses(vec![2, 3, 5]));
        assert!(cli.run.verbose);

        assert!(
            Cli::try_parse_from(["cleanup", "--course-ids", "2", "--course-scope", "all"]).is_err()
        );
    }

    #[test]
    fn time_limit_overrides_the_configuration() {
        let cli = Cli::try_parse_from(["cleanup", "--time-limit", "30"]).unwrap();
        assert_eq!(
            cli.run.time_limit(Some(Duration::minutes(10))),
            Some(Duration::seconds(30))
        );

        let cli = Cli::try_parse_from(["cleanup"]).unwrap();
        assert_eq!(
            cli.run.time_limit(Some(Duration::minutes(10))),
            Some(Duration::minutes(10))
        );
    }
}
