// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![deny(missing_docs, rustdoc::missing_crate_level_docs)]
#![allow(clippy::module_name_repetitions)]
// derive(JSONSchema) uses &str.to_string()
#![allow(clippy::str_to_string)]

//! Configuration of the question janitor, loaded from YAML files and
//! environment variables

pub(crate) mod schema;
mod sections;
pub(crate) mod util;

pub use self::{
    schema::root_schema,
    sections::*,
    util::{ConfigurationSection, ConfigurationSectionExt, ENV_PREFIX, load_figment},
};
