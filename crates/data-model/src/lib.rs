// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![allow(clippy::module_name_repetitions)]

pub(crate) mod attempts;
pub(crate) mod courses;
pub(crate) mod questions;
mod site_config;
pub(crate) mod users;

pub use self::{
    attempts::QuizAttempt,
    courses::{Course, CourseScope, InvalidCourseScope, Quiz},
    questions::{
        PREVIEW_COMPONENT, Question, QuestionCategory, QuestionStatistics, QuestionStatus,
        QuestionUsageInfo, TOP_CATEGORY_NAME, UnknownQuestionStatus,
    },
    site_config::SiteConfig,
    users::User,
};
