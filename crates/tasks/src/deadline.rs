// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use janitor_storage::Clock;
use tokio_util::sync::CancellationToken;

/// A soft time budget, polled between units of work.
///
/// Reaching it is not an error: callers stop starting new work and report
/// what they did so far.
#[derive(Clone)]
pub struct Deadline {
    clock: Arc<dyn Clock>,
    at: Option<DateTime<Utc>>,
    cancellation_token: Option<CancellationToken>,
}

impl Deadline {
    /// A deadline which is never reached
    #[must_use]
    pub fn unlimited(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            at: None,
            cancellation_token: None,
        }
    }

    /// A deadline reached once `limit` elapsed from now. A zero or negative
    /// limit means no limit at all.
    #[must_use]
    pub fn after(clock: Arc<dyn Clock>, limit: Option<Duration>) -> Self {
        let at = limit
            .filter(|limit| *limit > Duration::zero())
            .map(|limit| clock.now() + limit);

        Self {
            clock,
            at,
            cancellation_token: None,
        }
    }

    /// Also consider the deadline reached once the token is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// When the deadline expires, if it has a time limit
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    /// Whether the work should stop now
    #[must_use]
    pub fn is_reached(&self) -> bool {
        if self
            .cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return true;
        }

        self.at.is_some_and(|at| self.clock.now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use janitor_storage::clock::MockClock;

    use super::*;

    #[test]
    fn time_limit() {
        let clock = Arc::new(MockClock::default());
        let deadline = Deadline::after(clock.clone(), Some(Duration::seconds(30)));
        assert!(!deadline.is_reached());

        clock.advance(Duration::seconds(29));
        assert!(!deadline.is_reached());

        clock.advance(Duration::seconds(1));
        assert!(deadline.is_reached());
    }

    #[test]
    fn zero_means_unlimited() {
        let clock = Arc::new(MockClock::default());
        let deadline = Deadline::after(clock.clone(), Some(Duration::zero()));
        clock.advance(Duration::days(365));
        assert!(!deadline.is_reached());
        assert_eq!(deadline.expires_at(), None);
    }

    #[test]
    fn cancellation() {
        let clock = Arc::new(MockClock::default());
        let token = CancellationToken::new();
        let deadline = Deadline::unlimited(clock).with_cancellation(token.clone());
        assert!(!deadline.is_reached());

        token.cancel();
        assert!(deadline.is_reached());
    }
}
