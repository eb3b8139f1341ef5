// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use figment::Figment;
use janitor_data_model::CourseScope;
use janitor_tasks::{Deadline, Mode, StdoutSink, repair};
use tracing::{Instrument, info, info_span};

use crate::util::{load_config, seconds, state_from_config};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// What to do with the broken questions: `report`, `delete` or `fix`
    #[arg(long)]
    action: Mode,

    /// The course to look into, or `all` for the whole site
    #[arg(long, default_value = "all")]
    course_scope: CourseScope,

    /// Stop gracefully after this many seconds
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<u64>,

    /// Output a line for every processed question
    #[arg(short, long)]
    verbose: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.repair", action = %self.action, scope = %self.course_scope);

        async move {
            let config = load_config(figment)?;
            let state = state_from_config(&config).await?;

            let time_limit = self
                .time_limit
                .and_then(seconds)
                .or(state.site_config().time_limit);
            let deadline = Deadline::after(state.shared_clock(), time_limit);

            let summary = repair(
                &state,
                self.course_scope,
                self.action,
                &deadline,
                &mut StdoutSink,
                self.verbose,
            )
            .await?;
            info!(
                fixed = summary.fixed,
                failed = summary.failed,
                halted_by_deadline = summary.halted_by_deadline,
                "Repair finished"
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

    #[test]
    fn exactly_one_action() {
        let opts = Options::try_parse_from(["repair", "--action", "fix"]).unwrap();
        assert_eq!(opts.action, Mode::Fix);
        assert_eq!(opts.course_scope, CourseScope::All);

        let opts =
            Options::try_parse_from(["repair", "--action", "report", "--course-scope", "4"])
                .unwrap();
        assert_eq!(opts.action, Mode::Report);
        assert_eq!(opts.course_scope, CourseScope::Course(4));

        assert!(Options::try_parse_from(["repair"]).is_err());
        assert!(Options::try_parse_from(["repair", "--action", "nuke"]).is_err());
        assert!(
            Options::try_parse_from(["repair", "--action", "fix", "--action", "delete"]).is_err()
        );
    }
}
