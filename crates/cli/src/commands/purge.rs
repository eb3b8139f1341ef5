// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::{ArgGroup, Parser};
use figment::Figment;
use janitor_storage::Clock;
use janitor_tasks::{AttemptScope, Deadline, StdoutSink, purge_attempts};
use tracing::{Instrument, info, info_span};

use crate::util::{load_config, seconds, state_from_config};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `YYYY-MM-DD HH:MM:SS` date, in UTC, or an RFC 3339 one
fn parse_date(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match NaiveDateTime::parse_from_str(value, DATE_FORMAT) {
        Ok(naive) => Ok(Utc.from_utc_datetime(&naive)),
        Err(_) => DateTime::parse_from_rfc3339(value).map(|date| date.with_timezone(&Utc)),
    }
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("cutoff").required(true)))]
pub(super) struct Options {
    /// Delete the attempts started more than this many days ago
    #[arg(long, group = "cutoff")]
    days: Option<u32>,

    /// Delete the attempts started before this Unix timestamp
    #[arg(long, group = "cutoff")]
    timestamp: Option<i64>,

    /// Delete the attempts started before this date, as `YYYY-MM-DD
    /// HH:MM:SS` in UTC
    #[arg(long, group = "cutoff", value_parser = parse_date)]
    date: Option<DateTime<Utc>>,

    /// Only delete the attempts on the quizzes of this course
    #[arg(long, conflicts_with = "quiz_id")]
    course_id: Option<i64>,

    /// Only delete the attempts on this quiz
    #[arg(long)]
    quiz_id: Option<i64>,

    /// Stop gracefully after this many seconds
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<u64>,

    /// Output a line for every deleted attempt
    #[arg(short, long)]
    verbose: bool,
}

impl Options {
    fn cutoff(&self, clock: &dyn Clock) -> anyhow::Result<DateTime<Utc>> {
        if let Some(days) = self.days {
            return Ok(clock.now() - chrono::Duration::days(i64::from(days)));
        }

        if let Some(timestamp) = self.timestamp {
            return DateTime::from_timestamp(timestamp, 0)
                .ok_or_else(|| anyhow::anyhow!("timestamp {timestamp} is out of range"));
        }

        self.date
            .ok_or_else(|| anyhow::anyhow!("one of --days, --timestamp or --date is required"))
    }

    fn scope(&self) -> AttemptScope {
        match (self.course_id, self.quiz_id) {
            (_, Some(quiz_id)) => AttemptScope::Quiz(quiz_id),
            (Some(course_id), None) => AttemptScope::Course(course_id),
            (None, None) => AttemptScope::All,
        }
    }

    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.purge_attempts");

        async move {
            let config = load_config(figment)?;
            let state = state_from_config(&config).await?;

            let cutoff = self.cutoff(state.clock())?;
            let scope = self.scope();
            info!(%cutoff, ?scope, verbose = self.verbose, "Purging quiz attempts");

            let time_limit = self
                .time_limit
                .and_then(seconds)
                .or(state.site_config().time_limit);
            let deadline = Deadline::after(state.shared_clock(), time_limit);

            let summary =
                purge_attempts(&state, cutoff, scope, &deadline, &mut StdoutSink).await?;
            info!(
                deleted = summary.deleted,
                skipped = summary.skipped,
                "Purge finished"
            );

            Ok(ExitCode::SUCCESS)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use janitor_storage::clock::MockClock;

    use super::*;

    #[test]
    fn parse_dates() {
        assert_eq!(
            parse_date("2022-01-16 14:40:00").unwrap(),
            Utc.with_ymd_and_hms(2022, 1, 16, 14, 40, 0).unwrap()
        );
        assert_eq!(
            parse_date("2022-01-16T16:40:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2022, 1, 16, 14, 40, 0).unwrap()
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn cutoff_from_days() {
        let clock = MockClock::default();
        let opts = Options::try_parse_from(["purge-attempts", "--days", "30"]).unwrap();
        assert_eq!(
            opts.cutoff(&clock).unwrap(),
            clock.now() - chrono::Duration::days(30)
        );
        assert_eq!(opts.scope(), AttemptScope::All);
    }

    #[test]
    fn cutoff_from_timestamp() {
        let clock = MockClock::default();
        let opts = Options::try_parse_from([
            "purge-attempts",
            "--timestamp",
            "1500",
            "--quiz-id",
            "9",
        ])
        .unwrap();
        assert_eq!(opts.cutoff(&clock).unwrap().timestamp(), 1500);
        assert_eq!(opts.scope(), AttemptScope::Quiz(9));
    }

    #[test]
    fn exactly_one_cutoff() {
        assert!(Options::try_parse_from(["purge-attempts"]).is_err());
        assert!(
            Options::try_parse_from(["purge-attempts", "--days", "3", "--timestamp", "10"])
                .is_err()
        );
        assert!(
            Options::try_parse_from([
                "purge-attempts",
                "--days",
                "3",
                "--course-id",
                "2",
                "--quiz-id",
                "4"
            ])
            .is_err()
        );
    }
}
