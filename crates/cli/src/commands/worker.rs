// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use figment::Figment;
use janitor_config::EmailTransportKind;
use tracing::{info, info_span};

use crate::{
    shutdown::ShutdownManager,
    util::{load_config, mailer_from_config, state_from_config, test_mailer_in_background},
};

#[derive(Parser, Debug, Default)]
pub(super) struct Options {}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let shutdown = ShutdownManager::new()?;
        let span = info_span!("cli.worker.init").entered();
        let config = load_config(figment)?;

        // Connect to the database
        info!("Connecting to the database");
        let state = state_from_config(&config).await?;

        if config.email.transport() != EmailTransportKind::Blackhole {
            let mailer = mailer_from_config(&config.email)?;
            test_mailer_in_background(&mailer, Duration::from_secs(30));
        } else {
            info!("No email backend configured, completion notifications will be dropped");
        }

        info!(
            schedule = %config.maintenance.schedule,
            "Starting the worker and the scheduled maintenance"
        );
        janitor_tasks::init_and_run(
            state,
            &config.maintenance.schedule,
            shutdown.soft_shutdown_token(),
            shutdown.task_tracker(),
        )?;

        drop(config);
        span.exit();

        shutdown.run().await;

        Ok(ExitCode::SUCCESS)
    }
}
