// Copyright 2024, 2025 New Vector Ltd.
// Copyright 2022-2024 The Matrix.org Foundation C.I.C.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() -> Result<(), serde_json::Error> {
    let schema = janitor_config::root_schema();
    serde_json::to_writer_pretty(std::io::stdout(), &schema)
}
