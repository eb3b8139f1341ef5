// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span};

use crate::util::load_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Dump the current config as YAML
    Dump {
        /// The path to the config file to dump
        ///
        /// If not specified, the config will be written to stdout
        #[clap(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Check a config file
    Check,

    /// Output the JSON Schema of the config file
    Schema,
}

async fn write_output(output: Option<Utf8PathBuf>, content: &str) -> anyhow::Result<()> {
    if let Some(output) = output {
        info!("Writing to {output:?}");
        let mut file = tokio::fs::File::create(output).await?;
        file.write_all(content.as_bytes()).await?;
    } else {
        info!("Writing to standard output");
        tokio::io::stdout().write_all(content.as_bytes()).await?;
    }

    Ok(())
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as SC;
        match self.subcommand {
            SC::Dump { output } => {
                let _span = info_span!("cli.config.dump").entered();

                let config = load_config(figment)?;
                let config = serde_yaml::to_string(&config)?;
                write_output(output, &config).await?;
            }

            SC::Check => {
                let _span = info_span!("cli.config.check").entered();

                let _config = load_config(figment)?;
                info!("Configuration file looks good");
            }

            SC::Schema => {
                let _span = info_span!("cli.config.schema").entered();

                let schema = janitor_config::root_schema();
                let mut schema = serde_json::to_string_pretty(&schema)?;
                schema.push('\n');
                write_output(None, &schema).await?;
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands() {
        let opts = Options::try_parse_from(["config", "dump", "-o", "out.yaml"]).unwrap();
        assert!(matches!(
            opts.subcommand,
            Subcommand::Dump { output: Some(ref path) } if path.as_str() == "out.yaml"
        ));

        let opts = Options::try_parse_from(["config", "check"]).unwrap();
        assert!(matches!(opts.subcommand, Subcommand::Check));

        assert!(Options::try_parse_from(["config", "generate"]).is_err());
    }
}
