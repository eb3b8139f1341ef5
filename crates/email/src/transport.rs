// Copyright 2024, 2025 New Vector Ltd.
// Copyright 2022-2024 The Matrix.org Foundation C.I.C.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Email transport backends

use std::{ffi::OsString, num::NonZeroU16, sync::Arc};

use async_trait::async_trait;
use lettre::{
    AsyncTransport, Tokio1Executor,
    address::Envelope,
    transport::{
        sendmail::AsyncSendmailTransport,
        smtp::{AsyncSmtpTransport, authentication::Credentials},
    },
};
use thiserror::Error;

/// Encryption mode to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMode {
    /// Plain text
    Plain,
    /// `StartTLS` (starts as plain text then upgrade to TLS)
    StartTls,
    /// TLS
    Tls,
}

/// A cheaply cloneable wrapper around the supported [`AsyncTransport`]s
#[derive(Default, Clone)]
pub struct Transport {
    backend: Arc<Backend>,
}

#[derive(Default)]
enum Backend {
    /// Drop every message, for sites which don't want notifications
    #[default]
    Blackhole,
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Sendmail(AsyncSendmailTransport<Tokio1Executor>),
}

/// An error returned by one of the backends
#[derive(Debug, Error)]
#[error(transparent)]
pub enum Error {
    Smtp(#[from] lettre::transport::smtp::Error),
    Sendmail(#[from] lettre::transport::sendmail::Error),
}

impl Transport {
    fn from_backend(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Construct a transport which drops every message
    #[must_use]
    pub fn blackhole() -> Self {
        Self::from_backend(Backend::Blackhole)
    }

    /// Construct a SMTP transport
    ///
    /// # Errors
    ///
    /// Returns an error if the relay could not be set up for the given
    /// hostname
    pub fn smtp(
        mode: SmtpMode,
        hostname: &str,
        port: Option<NonZeroU16>,
        credentials: Option<Credentials>,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder = match mode {
            SmtpMode::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(hostname),
            SmtpMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(hostname)?,
            SmtpMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(hostname)?,
        };

        if let Some(credentials) = credentials {
            builder = builder.credentials(credentials);
        }

        if let Some(port) = port {
            builder = builder.port(port.get());
        }

        Ok(Self::from_backend(Backend::Smtp(builder.build())))
    }

    /// Construct a transport which pipes messages to the `sendmail` command,
    /// or to the given command
    #[must_use]
    pub fn sendmail(command: Option<impl Into<OsString>>) -> Self {
        let transport = match command {
            Some(command) => AsyncSendmailTransport::new_with_command(command),
            None => AsyncSendmailTransport::new(),
        };
        Self::from_backend(Backend::Sendmail(transport))
    }

    /// Whether messages are actually delivered somewhere
    #[must_use]
    pub fn is_blackhole(&self) -> bool {
        matches!(*self.backend, Backend::Blackhole)
    }

    /// Test the connection to the mail server. Only the SMTP backend has
    /// anything to check.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the connection test failed
    pub async fn test_connection(&self) -> Result<(), Error> {
        if let Backend::Smtp(transport) = self.backend.as_ref() {
            transport.test_connection().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl AsyncTransport for Transport {
    type Ok = ();
    type Error = Error;

    async fn send_raw(&self, envelope: &Envelope, email: &[u8]) -> Result<Self::Ok, Self::Error> {
        match self.backend.as_ref() {
            Backend::Blackhole => {
                tracing::warn!(
                    recipients = envelope.to().len(),
                    "A notification was supposed to be sent but no email backend is configured"
                );
            }
            Backend::Smtp(transport) => {
                transport.send_raw(envelope, email).await?;
            }
            Backend::Sendmail(transport) => {
                transport.send_raw(envelope, email).await?;
            }
        }

        Ok(())
    }
}
