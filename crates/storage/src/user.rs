// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to look up the users of the LMS

use async_trait::async_trait;
use janitor_data_model::User;

use crate::repository_impl;

/// A [`UserRepository`] helps looking up the users who requested a cleanup
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup a [`User`] by its ID
    ///
    /// Returns `None` if no [`User`] was found
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, id: i64) -> Result<Option<User>, Self::Error>;
}

repository_impl!(UserRepository:
    async fn lookup(&mut self, id: i64) -> Result<Option<User>, Self::Error>;
);
