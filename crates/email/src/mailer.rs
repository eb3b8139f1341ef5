// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Send emails to users

use async_trait::async_trait;
use janitor_data_model::User;
use lettre::{
    Address, AsyncTransport, Message,
    message::{Mailbox, MessageBuilder, MultiPart},
};
use thiserror::Error;

use crate::{MailTransport, Notifier};

/// Helps sending mails to users
#[derive(Clone)]
pub struct Mailer {
    transport: MailTransport,
    from: Mailbox,
    reply_to: Mailbox,
}

/// An error which happened while sending a notification
#[derive(Debug, Error)]
pub enum Error {
    /// The user has no usable email address
    #[error("user {0} has no email address")]
    NoAddress(i64),

    /// The email address of the user could not be parsed
    #[error("invalid email address for user {user_id}")]
    InvalidAddress {
        /// The recipient
        user_id: i64,

        /// Why the address is invalid
        #[source]
        source: lettre::address::AddressError,
    },

    /// The transport refused the message
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),

    /// The message could not be built
    #[error(transparent)]
    Content(#[from] lettre::error::Error),
}

impl Mailer {
    /// Constructs a new [`Mailer`]
    #[must_use]
    pub fn new(transport: MailTransport, from: Mailbox, reply_to: Mailbox) -> Self {
        Self {
            transport,
            from,
            reply_to,
        }
    }

    fn base_message(&self) -> MessageBuilder {
        Message::builder()
            .from(self.from.clone())
            .reply_to(self.reply_to.clone())
            // By passing `None`, lettre generates a random message ID
            // with a random UUID and the hostname for us
            .message_id(None)
    }

    fn recipient(user: &User) -> Result<Mailbox, Error> {
        let email = user
            .email
            .as_deref()
            .filter(|_| user.can_be_notified())
            .ok_or(Error::NoAddress(user.id))?;

        let address: Address = email.parse().map_err(|source| Error::InvalidAddress {
            user_id: user.id,
            source,
        })?;

        let name = Some(user.full_name()).filter(|name| !name.is_empty());
        Ok(Mailbox::new(name, address))
    }

    fn prepare_message(
        &self,
        to: Mailbox,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<Message, Error> {
        let multipart = MultiPart::alternative_plain_html(text.to_owned(), html.to_owned());

        let message = self
            .base_message()
            .subject(subject.trim())
            .to(to)
            .multipart(multipart)?;

        Ok(message)
    }

    /// Test the connetion to the mail server
    ///
    /// # Errors
    ///
    /// Returns an error if the connection failed
    #[tracing::instrument(name = "email.test_connection", skip_all)]
    pub async fn test_connection(&self) -> Result<(), crate::transport::Error> {
        self.transport.test_connection().await
    }
}

#[async_trait]
impl Notifier for Mailer {
    #[tracing::instrument(
        name = "email.notification.send",
        skip_all,
        fields(
            user.id = user.id,
            email.subject = subject,
        ),
        err,
    )]
    async fn send(
        &self,
        user: &User,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), Error> {
        let to = Self::recipient(user)?;
        let message = self.prepare_message(to, subject, text, html)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: Option<&str>) -> User {
        User {
            id: 3,
            username: "jdoe".to_owned(),
            first_name: "Jane".to_owned(),
            last_name: "Doe".to_owned(),
            email: email.map(ToOwned::to_owned),
            deleted: false,
        }
    }

    #[test]
    fn recipient_uses_the_full_name() {
        let mailbox = Mailer::recipient(&user(Some("jane@example.com"))).unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Jane Doe"));
        assert_eq!(mailbox.email.to_string(), "jane@example.com");
    }

    #[test]
    fn recipient_without_address() {
        assert!(matches!(
            Mailer::recipient(&user(None)),
            Err(Error::NoAddress(3))
        ));
        assert!(matches!(
            Mailer::recipient(&user(Some("not an address"))),
            Err(Error::InvalidAddress { user_id: 3, .. })
        ));
    }

    #[tokio::test]
    async fn blackhole_accepts_everything() {
        let from: Mailbox = "Janitor <janitor@example.com>".parse().unwrap();
        let mailer = Mailer::new(MailTransport::blackhole(), from.clone(), from);
        mailer
            .send(
                &user(Some("jane@example.com")),
                "Question Cleanup Completed",
                "Done",
                "<pre>Done</pre>",
            )
            .await
            .unwrap();
    }
}
