// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::Duration;

/// Site-wide settings the cleanup operations need access to.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// ID of the site-level course, which is never cleaned up as part of
    /// "all courses".
    pub site_course_id: i64,

    /// Soft time budget of a single cleanup run, if any.
    pub time_limit: Option<Duration>,

    /// Whether to output a line for every processed item.
    pub verbose: bool,

    /// Quiz attempts older than this are purged by the scheduled
    /// maintenance. `None` disables the purge.
    pub attempt_lifetime: Option<Duration>,

    /// Whether the scheduled maintenance also deletes unused hidden
    /// questions.
    pub delete_unused_questions: bool,

    /// Soft time budget of the scheduled maintenance, if any.
    pub max_execution_time: Option<Duration>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_course_id: 1,
            time_limit: None,
            verbose: false,
            attempt_lifetime: None,
            delete_unused_questions: false,
            max_execution_time: None,
        }
    }
}
