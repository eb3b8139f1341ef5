// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use janitor_storage::RepositoryError;
use thiserror::Error;
use thiserror_ext::ContextInto;

/// Errors which stop a whole operation before or while it runs.
///
/// Errors on a single candidate never end up here: they are reported as a
/// skipped or failed candidate instead.
#[derive(Debug, Error, ContextInto)]
pub enum CleanupError {
    #[error("course {0} does not exist")]
    CourseNotFound(i64),

    #[error("quiz {0} does not exist")]
    QuizNotFound(i64),

    #[error("store error whilst {context}")]
    Store {
        #[source]
        source: RepositoryError,
        context: String,
    },
}
