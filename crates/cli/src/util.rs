// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use anyhow::Context;
use figment::Figment;
use janitor_config::{
    CleanupConfig, ConfigurationSection, DatabaseConfig, EmailConfig, EmailSmtpMode,
    EmailTransportKind, MaintenanceConfig, RootConfig,
};
use janitor_data_model::SiteConfig;
use janitor_email::{MailTransport, Mailer};
use janitor_storage::SystemClock;
use janitor_storage_pg::{PgRepositoryFactory, Tables};
use janitor_tasks::State;
use sqlx::{
    ConnectOptions, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::{Instrument, log::LevelFilter};

/// Load and validate the whole configuration
pub fn load_config(figment: &Figment) -> anyhow::Result<RootConfig> {
    RootConfig::extract(figment)
        .map_err(anyhow::Error::from_boxed)
        .context("invalid configuration")
}

pub fn mailer_from_config(config: &EmailConfig) -> Result<Mailer, anyhow::Error> {
    let from = config
        .from
        .parse()
        .context("invalid email configuration: invalid 'from' address")?;
    let reply_to = config
        .reply_to
        .parse()
        .context("invalid email configuration: invalid 'reply_to' address")?;
    let transport = match config.transport() {
        EmailTransportKind::Blackhole => MailTransport::blackhole(),
        EmailTransportKind::Smtp => {
            // This should have been set ahead of time
            let hostname = config
                .hostname()
                .context("invalid email configuration: missing hostname")?;

            let mode = config
                .mode()
                .context("invalid email configuration: missing mode")?;

            let credentials = config.credentials().map(|credentials| {
                janitor_email::SmtpCredentials::new(credentials.username, credentials.password)
            });

            let mode = match mode {
                EmailSmtpMode::Plain => janitor_email::SmtpMode::Plain,
                EmailSmtpMode::StartTls => janitor_email::SmtpMode::StartTls,
                EmailSmtpMode::Tls => janitor_email::SmtpMode::Tls,
            };

            MailTransport::smtp(mode, hostname, config.port(), credentials)
                .context("failed to build SMTP transport")?
        }
        EmailTransportKind::Sendmail => MailTransport::sendmail(config.command()),
    };

    Ok(Mailer::new(transport, from, reply_to))
}

/// Test the connection to the mail backend in a background task
pub fn test_mailer_in_background(mailer: &Mailer, timeout: Duration) {
    let mailer = mailer.clone();

    let span = tracing::info_span!("cli.test_mailer");
    tokio::spawn(
        async move {
            match tokio::time::timeout(timeout, mailer.test_connection()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "Could not connect to the mail backend, completion notifications may fail!"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Timed out while testing the mail backend connection, completion notifications may fail!"
                    );
                }
            }
        }
        .instrument(span),
    );
}

/// Convert a configured duration to the one the engine works with
pub fn engine_duration(duration: Duration) -> Option<chrono::Duration> {
    chrono::Duration::from_std(duration).ok()
}

/// A number of seconds given on the command line, as a duration the engine
/// works with
pub fn seconds(value: u64) -> Option<chrono::Duration> {
    engine_duration(Duration::from_secs(value))
}

pub fn site_config_from_config(
    cleanup_config: &CleanupConfig,
    maintenance_config: &MaintenanceConfig,
) -> SiteConfig {
    SiteConfig {
        site_course_id: cleanup_config.site_course_id,
        time_limit: cleanup_config.time_limit.and_then(engine_duration),
        verbose: cleanup_config.verbose,
        attempt_lifetime: maintenance_config
            .attempt_lifetime()
            .and_then(engine_duration),
        delete_unused_questions: maintenance_config.delete_unused_questions,
        max_execution_time: maintenance_config
            .max_execution_time()
            .and_then(engine_duration),
    }
}

fn database_connect_options_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnectOptions, anyhow::Error> {
    let options = if let Some(uri) = config.uri.as_deref() {
        uri.parse()
            .context("could not parse database connection string")?
    } else {
        let mut opts = PgConnectOptions::new().application_name("question-janitor");

        if let Some(host) = config.host.as_deref() {
            opts = opts.host(host);
        }

        if let Some(port) = config.port {
            opts = opts.port(port);
        }

        if let Some(socket) = config.socket.as_deref() {
            opts = opts.socket(socket);
        }

        if let Some(username) = config.username.as_deref() {
            opts = opts.username(username);
        }

        if let Some(password) = config.password.as_deref() {
            opts = opts.password(password);
        }

        if let Some(database) = config.database.as_deref() {
            opts = opts.database(database);
        }

        opts
    };

    Ok(options
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_millis(500)))
}

/// Create a database connection pool from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, anyhow::Error> {
    let options = database_connect_options_from_config(config)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections.into())
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .context("could not connect to the database")
}

/// Connect to the database and wire everything the engine needs
pub async fn state_from_config(config: &RootConfig) -> Result<State, anyhow::Error> {
    let pool = database_pool_from_config(&config.database).await?;
    let tables = Tables::new(config.database.table_prefix.clone());
    let repository_factory = PgRepositoryFactory::new(pool, tables).boxed();

    let mailer = mailer_from_config(&config.email)?;
    let site_config = site_config_from_config(&config.cleanup, &config.maintenance);

    Ok(State::new(
        repository_factory,
        SystemClock::default(),
        mailer,
        site_config,
    ))
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn site_config_from_the_sections() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      site_course_id: 4
                      time_limit: 120
                    maintenance:
                      attempt_lifetime: 2
                      max_execution_time: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = load_config(&figment).unwrap();
            let site_config = site_config_from_config(&config.cleanup, &config.maintenance);

            assert_eq!(site_config.site_course_id, 4);
            assert_eq!(site_config.time_limit, Some(chrono::Duration::seconds(120)));
            assert_eq!(site_config.attempt_lifetime, Some(chrono::Duration::days(2)));
            assert_eq!(site_config.max_execution_time, None);
            assert!(!site_config.delete_unused_questions);

            Ok(())
        });
    }

    #[test]
    fn command_line_seconds() {
        assert_eq!(seconds(90), Some(chrono::Duration::seconds(90)));
        assert_eq!(seconds(u64::MAX), None);
    }

    #[test]
    fn split_connection_options() {
        let config = DatabaseConfig {
            uri: None,
            host: Some("db.example.com".to_owned()),
            port: Some(5433),
            database: Some("moodle".to_owned()),
            ..DatabaseConfig::default()
        };

        let options = database_connect_options_from_config(&config).unwrap();
        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("moodle"));
    }

    #[tokio::test]
    async fn blackhole_mailer_by_default() {
        let mailer = mailer_from_config(&EmailConfig::default()).unwrap();
        mailer.test_connection().await.unwrap();
    }
}
