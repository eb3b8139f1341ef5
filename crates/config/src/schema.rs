// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Useful JSON Schema definitions

use schemars::{
    JsonSchema,
    r#gen::{SchemaGenerator, SchemaSettings},
    schema::{InstanceType, RootSchema, Schema, SchemaObject},
};

use crate::RootConfig;

/// A network hostname
pub struct Hostname;

impl JsonSchema for Hostname {
    fn schema_name() -> String {
        "Hostname".to_string()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        Schema::Object(SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            format: Some("hostname".to_owned()),
            ..SchemaObject::default()
        })
    }
}

/// Generate the JSON Schema of the whole configuration file
#[must_use]
pub fn root_schema() -> RootSchema {
    SchemaSettings::draft07()
        .with(|settings| {
            settings.option_nullable = false;
            settings.option_add_null_type = true;
        })
        .into_generator()
        .into_root_schema_for::<RootConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lists_every_section() {
        let schema = root_schema();
        let properties = &schema
            .schema
            .object
            .as_ref()
            .expect("the root schema is an object")
            .properties;

        let sections: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(sections, ["database", "cleanup", "maintenance", "email"]);
    }
}
