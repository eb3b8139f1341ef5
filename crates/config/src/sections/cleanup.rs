// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as, skip_serializing_none};

use super::ConfigurationSection;

fn default_site_course_id() -> i64 {
    1
}

fn default_false() -> bool {
    false
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_false(value: &bool) -> bool {
    *value == default_false()
}

/// Configuration of the cleanup runs
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CleanupConfig {
    /// ID of the site-level course. It is never cleaned up as part of "all
    /// courses"
    #[serde(default = "default_site_course_id")]
    pub site_course_id: i64,

    /// Maximum duration of a single cleanup run, in seconds. The run stops
    /// gracefully after the item being processed when it is reached
    #[schemars(with = "Option<u64>")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub time_limit: Option<Duration>,

    /// Whether to output a line for every processed item
    #[serde(default = "default_false", skip_serializing_if = "is_default_false")]
    pub verbose: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            site_course_id: default_site_course_id(),
            time_limit: None,
            verbose: default_false(),
        }
    }
}

impl CleanupConfig {
    /// Returns true if the configuration is the default one
    pub(crate) fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

impl ConfigurationSection for CleanupConfig {
    const PATH: Option<&'static str> = Some("cleanup");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.time_limit == Some(Duration::ZERO) {
            let mut error = figment::error::Error::from(
                "time_limit must be positive, leave it out to run without a limit".to_owned(),
            );
            error.metadata = figment.find_metadata("cleanup.time_limit").cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["cleanup".to_owned(), "time_limit".to_owned()];
            return Err(error.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      site_course_id: 7
                      time_limit: 300
                ",
            )?;

            let config = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .extract_inner::<CleanupConfig>("cleanup")?;

            assert_eq!(config.site_course_id, 7);
            assert_eq!(config.time_limit, Some(Duration::from_secs(300)));
            assert!(!config.verbose);

            Ok(())
        });
    }

    #[test]
    fn zero_time_limit() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      time_limit: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = CleanupConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("time_limit must be positive"));

            Ok(())
        });
    }
}
