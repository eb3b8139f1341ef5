// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Course {
    pub id: i64,
    pub short_name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quiz {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
}

/// The set of courses an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "String", try_from = "String")]
pub enum CourseScope {
    /// Every course on the site, except the site course itself
    #[default]
    All,

    /// A single course, by ID
    Course(i64),
}

impl CourseScope {
    /// The ID of the course, if this scope is a single course
    #[must_use]
    pub const fn course_id(self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Course(id) => Some(id),
        }
    }

    #[must_use]
    pub const fn is_all(self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for CourseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Course(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid course scope {0:?}, expected a course ID or \"all\"")]
pub struct InvalidCourseScope(String);

impl FromStr for CourseScope {
    type Err = InvalidCourseScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        match s.parse::<i64>() {
            // Course ID 0 is how the LMS spells "no course"
            Ok(0) => Ok(Self::All),
            Ok(id) if id > 0 => Ok(Self::Course(id)),
            _ => Err(InvalidCourseScope(s.to_owned())),
        }
    }
}

impl From<CourseScope> for String {
    fn from(value: CourseScope) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CourseScope {
    type Error = InvalidCourseScope;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
