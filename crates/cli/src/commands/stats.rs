// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use figment::Figment;
use janitor_tasks::{ProgressSink, StdoutSink, all_courses, course_statistics, top_courses};
use tracing::{Instrument, info_span};

use crate::util::{load_config, state_from_config};

const DEFAULT_TOP: usize = 10;

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Show the statistics of a single course
    #[arg(long, conflicts_with_all = ["top", "all"])]
    course_id: Option<i64>,

    /// Add breakdowns by question type, status and usage to the statistics
    /// of a single course
    #[arg(short, long, requires = "course_id")]
    verbose: bool,

    /// Show the courses with the most questions
    #[arg(long, value_name = "N", conflicts_with = "all")]
    top: Option<usize>,

    /// Show every course, with the grand totals
    #[arg(long)]
    all: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.stats");

        async move {
            let config = load_config(figment)?;
            let state = state_from_config(&config).await?;

            let lines = if let Some(course_id) = self.course_id {
                course_statistics(&state, course_id, self.verbose)
                    .await?
                    .render(self.verbose)
            } else if self.all {
                all_courses(&state).await?.render()
            } else {
                top_courses(&state, self.top.unwrap_or(DEFAULT_TOP))
                    .await?
                    .render()
            };

            let mut sink = StdoutSink;
            for line in &lines {
                sink.output(line);
            }

            Ok(ExitCode::SUCCESS)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        let opts = Options::try_parse_from(["stats"]).unwrap();
        assert_eq!(opts.course_id, None);
        assert_eq!(opts.top, None);
        assert!(!opts.all);

        let opts = Options::try_parse_from(["stats", "--course-id", "3", "--verbose"]).unwrap();
        assert_eq!(opts.course_id, Some(3));
        assert!(opts.verbose);

        let opts = Options::try_parse_from(["stats", "--top", "5"]).unwrap();
        assert_eq!(opts.top, Some(5));
    }

    #[test]
    fn conflicting_modes() {
        assert!(Options::try_parse_from(["stats", "--verbose"]).is_err());
        assert!(Options::try_parse_from(["stats", "--course-id", "3", "--all"]).is_err());
        assert!(Options::try_parse_from(["stats", "--top", "3", "--all"]).is_err());
    }
}
