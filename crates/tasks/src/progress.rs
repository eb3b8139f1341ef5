// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Progress reporting.
//!
//! The engine only ever writes lines to a [`ProgressSink`]. The caller picks
//! where they end up: the terminal for the CLI, the logs and a buffer for the
//! worker, which then sends the buffer to the requesting user.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::policy::Outcome;

/// How often a progress line is emitted, in processed candidates
const PROGRESS_INTERVAL: usize = 100;

/// Where the progress lines go
pub trait ProgressSink: Send {
    /// Output a line
    fn output(&mut self, line: &str);

    /// Called once the whole run is over
    fn finished(&mut self) {}
}

/// Output lines to both sinks
impl<A: ProgressSink, B: ProgressSink> ProgressSink for (A, B) {
    fn output(&mut self, line: &str) {
        self.0.output(line);
        self.1.output(line);
    }

    fn finished(&mut self) {
        self.0.finished();
        self.1.finished();
    }
}

/// Drops every line
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn output(&mut self, _line: &str) {}
}

/// Forwards lines to the logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn output(&mut self, line: &str) {
        tracing::info!("{line}");
    }

    fn finished(&mut self) {
        tracing::debug!("Run finished");
    }
}

/// Prints lines on the standard output
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    #[allow(clippy::print_stdout)]
    fn output(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Keeps the lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<bool>>,
}

impl BufferSink {
    /// Create a new, empty, buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lines collected so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether [`ProgressSink::finished`] was called
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.lock().is_ok_and(|finished| *finished)
    }
}

impl ProgressSink for BufferSink {
    fn output(&mut self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_owned());
        }
    }

    fn finished(&mut self) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = true;
        }
    }
}

/// The counters of a step, or of a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub deleted: usize,
    pub skipped: usize,
    pub fixed: usize,
    pub failed: usize,

    /// How many candidates were found
    pub total: usize,
}

impl Summary {
    /// Add the counters of another summary to this one
    pub fn accumulate(&mut self, other: &Self) {
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.fixed += other.fixed;
        self.failed += other.failed;
        self.total += other.total;
    }

    /// Count an outcome
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Deleted => self.deleted += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Fixed => self.fixed += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Counts outcomes of a step and writes its messages to a sink
pub struct ProgressReporter<'s> {
    sink: &'s mut dyn ProgressSink,
    verbose: bool,
    summary: Summary,
}

impl<'s> ProgressReporter<'s> {
    /// Start reporting a step to the given sink
    pub fn new(sink: &'s mut dyn ProgressSink, verbose: bool) -> Self {
        Self {
            sink,
            verbose,
            summary: Summary::default(),
        }
    }

    /// Set how many candidates the step found
    pub fn set_total(&mut self, total: usize) {
        self.summary.total = total;
    }

    /// Output a message
    pub fn emit(&mut self, message: &str) {
        self.sink.output(message);
    }

    /// Output a message about a single candidate, only in verbose mode
    pub fn detail(&mut self, message: &str) {
        if self.verbose {
            self.sink.output(message);
        }
    }

    /// Whether detail messages are output
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Count the outcome of a candidate, outputting a progress line every
    /// now and then
    pub fn tally(&mut self, outcome: &Outcome) {
        self.summary.record(outcome);

        if matches!(outcome, Outcome::Deleted | Outcome::Skipped(_)) {
            let processed = self.summary.deleted + self.summary.skipped;
            if processed % PROGRESS_INTERVAL == 0 {
                self.progress();
            }
        }
    }

    fn progress(&mut self) {
        let line = format!(
            "Deleted {}, skipped {} of {}",
            self.summary.deleted, self.summary.skipped, self.summary.total
        );
        self.sink.output(&line);
    }

    /// The counters so far
    #[must_use]
    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// End the step, with a last progress line if anything was found
    pub fn finish(mut self) -> Summary {
        if self.summary.total > 0 {
            self.progress();
        }
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SkipReason;

    #[test]
    fn progress_every_hundred_candidates() {
        let mut sink = BufferSink::new();
        let mut reporter = ProgressReporter::new(&mut sink, false);
        reporter.set_total(250);

        for i in 0..250 {
            reporter.detail("not shown");
            if i % 5 == 0 {
                reporter.tally(&Outcome::Skipped(SkipReason::StillPresent));
            } else {
                reporter.tally(&Outcome::Deleted);
            }
        }

        let summary = reporter.finish();
        assert_eq!(summary.deleted, 200);
        assert_eq!(summary.skipped, 50);

        assert_eq!(
            sink.lines(),
            vec![
                "Deleted 80, skipped 20 of 250",
                "Deleted 160, skipped 40 of 250",
                "Deleted 200, skipped 50 of 250",
            ]
        );
    }

    #[test]
    fn verbose_details() {
        let mut sink = BufferSink::new();
        let mut reporter = ProgressReporter::new(&mut sink, true);
        reporter.emit("No duplicate questions found.");
        reporter.detail("Deleted duplicate question: Q1 (ID: 2)");
        let summary = reporter.finish();

        assert_eq!(summary, Summary::default());
        assert_eq!(
            sink.lines(),
            vec![
                "No duplicate questions found.",
                "Deleted duplicate question: Q1 (ID: 2)",
            ]
        );
    }

    #[test]
    fn tee_sink() {
        let buffer = BufferSink::new();
        let mut sink = (buffer.clone(), NullSink);
        sink.output("hello");
        sink.finished();

        assert_eq!(buffer.lines(), vec!["hello"]);
        assert!(buffer.is_finished());
    }
}
