// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A learner's attempt at a quiz
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,

    /// The question usage which holds the per-question state of the attempt
    pub usage_id: i64,

    pub started_at: DateTime<Utc>,
}
