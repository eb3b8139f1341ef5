// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use janitor_tasks::Step;

mod cleanup;
mod config;
mod enqueue;
mod purge;
mod repair;
mod stats;
mod worker;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Run every cleanup step: duplicate questions, duplicate categories,
    /// empty categories and unused questions
    Cleanup(cleanup::Options),

    /// Only delete the duplicate questions
    DuplicateQuestions(cleanup::Options),

    /// Only delete the empty duplicate categories
    DuplicateCategories(cleanup::Options),

    /// Only delete the empty categories
    EmptyCategories(cleanup::Options),

    /// Only delete the unused hidden questions
    UnusedQuestions(cleanup::Options),

    /// Delete old quiz attempts
    PurgeAttempts(purge::Options),

    /// Find and repair questions missing their type-specific options or
    /// their answers
    Repair(repair::Options),

    /// Show statistics about the question banks
    Stats(stats::Options),

    /// Queue a background cleanup, picked up by the worker
    Enqueue(enqueue::Options),

    /// Run the background worker and the scheduled maintenance
    Worker(worker::Options),

    /// Configuration-related commands
    Config(config::Options),
}

#[derive(Parser, Debug)]
#[command(version, about = "Clean up the question banks of an LMS")]
pub struct Options {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Append,
        default_value = "config.yaml"
    )]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            S::Cleanup(c) => c.run(figment, &Step::ALL).await,
            S::DuplicateQuestions(c) => c.run(figment, &[Step::DuplicateQuestions]).await,
            S::DuplicateCategories(c) => c.run(figment, &[Step::DuplicateCategories]).await,
            S::EmptyCategories(c) => c.run(figment, &[Step::EmptyCategories]).await,
            S::UnusedQuestions(c) => c.run(figment, &[Step::UnusedQuestions]).await,
            S::PurgeAttempts(c) => c.run(figment).await,
            S::Repair(c) => c.run(figment).await,
            S::Stats(c) => c.run(figment).await,
            S::Enqueue(c) => c.run(figment).await,
            S::Worker(c) => c.run(figment).await,
            S::Config(c) => c.run(figment).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    pub fn figment(&self) -> Figment {
        janitor_config::load_figment(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn global_config_flag() {
        let opts = Options::try_parse_from([
            "janitor",
            "stats",
            "-c",
            "base.yaml",
            "--config",
            "local.yaml",
        ])
        .unwrap();

        assert_eq!(
            opts.config,
            [Utf8PathBuf::from("base.yaml"), Utf8PathBuf::from("local.yaml")]
        );
        assert!(matches!(opts.subcommand, Subcommand::Stats(_)));
    }

    #[test]
    fn default_config_file() {
        let opts = Options::try_parse_from(["janitor", "worker"]).unwrap();
        assert_eq!(opts.config, [Utf8PathBuf::from("config.yaml")]);
    }

    #[test]
    fn single_steps() {
        for (name, expected) in [
            ("duplicate-questions", "DuplicateQuestions"),
            ("duplicate-categories", "DuplicateCategories"),
            ("empty-categories", "EmptyCategories"),
            ("unused-questions", "UnusedQuestions"),
        ] {
            let opts = Options::try_parse_from(["janitor", name, "--course-scope", "3"]).unwrap();
            assert!(format!("{:?}", opts.subcommand).starts_with(expected));
        }
    }

    #[test]
    fn step_descriptions() {
        let command = Options::command();
        let about = |name: &str| {
            command
                .find_subcommand(name)
                .and_then(|c| c.get_about())
                .map(ToString::to_string)
        };
        assert_eq!(
            about("duplicate-categories").as_deref(),
            Some("Only delete the empty duplicate categories")
        );
        assert_eq!(
            about("empty-categories").as_deref(),
            Some("Only delete the empty categories")
        );
    }

    #[test]
    fn a_subcommand_is_required() {
        assert!(Options::try_parse_from(["janitor"]).is_err());
        assert!(Options::try_parse_from(["janitor", "vacuum"]).is_err());
    }
}
