// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod cleanup;
mod database;
mod email;
mod maintenance;

pub use self::{
    cleanup::CleanupConfig,
    database::DatabaseConfig,
    email::{Credentials as EmailCredentials, EmailConfig, EmailSmtpMode, EmailTransportKind},
    maintenance::MaintenanceConfig,
};
use crate::util::ConfigurationSection;

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Configuration of the cleanup runs
    #[serde(default, skip_serializing_if = "CleanupConfig::is_default")]
    pub cleanup: CleanupConfig,

    /// Configuration of the scheduled maintenance
    #[serde(default, skip_serializing_if = "MaintenanceConfig::is_default")]
    pub maintenance: MaintenanceConfig,

    /// Configuration related to sending completion notifications
    #[serde(default)]
    pub email: EmailConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;
        self.maintenance.validate(figment)?;
        self.email.validate(figment)?;

        Ok(())
    }
}
