// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{str::FromStr, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn default_schedule() -> String {
    // Every hour, on the hour
    "0 0 * * * *".to_owned()
}

/// Configuration of the scheduled maintenance, run by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MaintenanceConfig {
    /// Quiz attempts older than this number of days are deleted. 0 disables
    /// the purge
    #[serde(default)]
    pub attempt_lifetime: u32,

    /// Whether to also delete unused hidden questions
    #[serde(default)]
    pub delete_unused_questions: bool,

    /// Maximum duration of a maintenance run, in seconds. 0 means no limit
    #[serde(default)]
    pub max_execution_time: u64,

    /// When to run the maintenance, as a cron expression with a seconds field
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            attempt_lifetime: 0,
            delete_unused_questions: false,
            max_execution_time: 0,
            schedule: default_schedule(),
        }
    }
}

impl MaintenanceConfig {
    /// Returns true if the configuration is the default one
    pub(crate) fn is_default(&self) -> bool {
        self == &Self::default()
    }

    /// How old attempts must be to get purged, if the purge is enabled
    #[must_use]
    pub fn attempt_lifetime(&self) -> Option<Duration> {
        (self.attempt_lifetime > 0)
            .then(|| Duration::from_secs(u64::from(self.attempt_lifetime) * SECONDS_PER_DAY))
    }

    /// The time budget of a run, if any
    #[must_use]
    pub fn max_execution_time(&self) -> Option<Duration> {
        (self.max_execution_time > 0).then(|| Duration::from_secs(self.max_execution_time))
    }

    /// Parse the schedule
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule is not a valid cron expression
    pub fn schedule(&self) -> Result<cron::Schedule, cron::error::Error> {
        cron::Schedule::from_str(&self.schedule)
    }
}

impl ConfigurationSection for MaintenanceConfig {
    const PATH: Option<&'static str> = Some("maintenance");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if let Err(e) = self.schedule() {
            let mut error =
                figment::error::Error::from(format!("invalid maintenance schedule: {e}"));
            error.metadata = figment.find_metadata("maintenance.schedule").cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["maintenance".to_owned(), "schedule".to_owned()];
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
                    maintenance:
                      attempt_lifetime: 30
                      delete_unused_questions: true
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = MaintenanceConfig::extract(&figment).unwrap();

            assert_eq!(
                config.attempt_lifetime(),
                Some(Duration::from_secs(30 * 24 * 60 * 60))
            );
            assert!(config.delete_unused_questions);
            assert_eq!(config.max_execution_time(), None);
            assert_eq!(config.schedule, "0 0 * * * *");

            Ok(())
        });
    }

    #[test]
    fn disabled_by_default() {
        let config = MaintenanceConfig::default();
        assert!(config.is_default());
        assert_eq!(config.attempt_lifetime(), None);
        assert!(config.schedule().is_ok());
    }

    #[test]
    fn invalid_schedule() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    maintenance:
                      schedule: every hour
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = MaintenanceConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("invalid maintenance schedule"));

            Ok(())
        });
    }
}
