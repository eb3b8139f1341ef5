// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use janitor_data_model::SiteConfig;
use janitor_email::MockNotifier;
use janitor_storage::clock::MockClock;
use janitor_storage_memory::MemoryStore;

use crate::{Deadline, State};

pub(crate) struct TestState {
    pub store: MemoryStore,
    pub clock: Arc<MockClock>,
    pub notifier: MockNotifier,
    pub state: State,
}

impl TestState {
    pub fn new() -> Self {
        Self::with_site_config(SiteConfig::default())
    }

    pub fn with_site_config(site_config: SiteConfig) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let notifier = MockNotifier::new();
        let state = State::new(
            store.factory(),
            Arc::clone(&clock),
            notifier.clone(),
            site_config,
        );

        Self {
            store,
            clock,
            notifier,
            state,
        }
    }

    pub fn unlimited(&self) -> Deadline {
        Deadline::unlimited(self.state.shared_clock())
    }
}
