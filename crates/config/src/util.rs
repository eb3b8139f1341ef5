// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use camino::Utf8Path;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;

/// Prefix of the environment variables overriding the configuration files
pub const ENV_PREFIX: &str = "JANITOR_";

/// Build the [`Figment`] out of the given configuration files, in order, and
/// the `JANITOR_*` environment variables.
///
/// Nested keys are separated by a double underscore in the variable names,
/// e.g. `JANITOR_CLEANUP__TIME_LIMIT=300`.
#[must_use]
pub fn load_figment<P: AsRef<Utf8Path>>(paths: &[P]) -> Figment {
    let base = paths.iter().fold(Figment::new(), |figment, path| {
        figment.admerge(Yaml::file(path.as_ref()))
    });

    base.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Trait implemented by all configuration sections, to help loading a
/// specific part of the config.
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Specify where this section should live relative to the root.
    const PATH: Option<&'static str> = None;

    /// Validate the configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(
        &self,
        _figment: &Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(())
    }

    /// Extract configuration from a Figment instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be loaded
    fn extract(
        figment: &Figment,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let this: Self = if let Some(path) = Self::PATH {
            figment.extract_inner(path)?
        } else {
            figment.extract()?
        };

        this.validate(figment)?;
        Ok(this)
    }
}

/// Extension trait for [`ConfigurationSection`], falling back to the default
/// value when the section is absent.
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Extract the configuration section from the given [`Figment`], or return
    /// the default value if the section is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration section is invalid.
    fn extract_or_default(
        figment: &Figment,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let Some(path) = Self::PATH else {
            return Self::extract(figment);
        };

        if !figment.contains(path) {
            return Ok(Self::default());
        }

        Self::extract(figment)
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::{CleanupConfig, MaintenanceConfig};

    #[test]
    fn later_files_take_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "base.yaml",
                r"
                    cleanup:
                      site_course_id: 2
                      verbose: true
                ",
            )?;
            jail.create_file(
                "local.yaml",
                r"
                    cleanup:
                      site_course_id: 3
                ",
            )?;
            jail.set_env("JANITOR_CLEANUP__TIME_LIMIT", "60");

            let figment = load_figment(&["base.yaml", "local.yaml"]);
            let config = CleanupConfig::extract_or_default(&figment).unwrap();

            assert_eq!(config.site_course_id, 3);
            assert!(config.verbose);
            assert_eq!(config.time_limit, Some(std::time::Duration::from_secs(60)));

            let maintenance = MaintenanceConfig::extract_or_default(&figment).unwrap();
            assert_eq!(maintenance, MaintenanceConfig::default());

            Ok(())
        });
    }
}
