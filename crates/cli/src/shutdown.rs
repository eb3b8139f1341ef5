// Copyright 2024, 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long a running cleanup gets to stop after the first signal
const GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Handles the graceful shutdown of the worker.
///
/// The first SIGTERM or SIGINT (Ctrl-C) cancels the soft shutdown token: the
/// worker stops picking up jobs, and a running cleanup stops after the item
/// it is processing, like when it reaches its time limit. A second signal, or
/// the end of the grace period, stops waiting for the tracked tasks.
pub struct ShutdownManager {
    soft_shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
    timeout: Duration,
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler could not be installed
    pub fn new() -> Result<Self, std::io::Error> {
        let sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
        let sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;

        Ok(Self {
            soft_shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            sigterm,
            sigint,
            timeout: GRACE_PERIOD,
        })
    }

    /// Get a reference to the task tracker
    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Get a cancellation token that can be used to react to a soft shutdown
    #[must_use]
    pub fn soft_shutdown_token(&self) -> CancellationToken {
        self.soft_shutdown_token.clone()
    }

    /// Run until the tracked tasks are done, or until we give up on them
    pub async fn run(mut self) {
        // Wait for a first signal and trigger the soft shutdown
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Shutdown signal received (SIGTERM), shutting down");
            },
            _ = self.sigint.recv() => {
                tracing::info!("Shutdown signal received (SIGINT), shutting down");
            },
        };

        self.soft_shutdown_token.cancel();
        self.task_tracker.close();

        let timeout = tokio::time::sleep(self.timeout);
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::warn!("Second shutdown signal received (SIGTERM), abort");
            },
            _ = self.sigint.recv() => {
                tracing::warn!("Second shutdown signal received (SIGINT), abort");
            },
            () = timeout => {
                tracing::warn!("Shutdown timeout reached, abort");
            },
            () = self.task_tracker.wait() => {
                tracing::info!("Worker stopped");
                return;
            },
        }

        tracing::warn!(
            tasks = self.task_tracker.len(),
            "Giving up on the running tasks"
        );
    }
}
