// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Notify users once their cleanup is done, with different email backends

#![deny(missing_docs)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use janitor_data_model::User;

mod mailer;
mod transport;

pub use lettre::{
    Address, message::Mailbox, transport::smtp::authentication::Credentials as SmtpCredentials,
};

pub use self::{
    mailer::{Error, Mailer},
    transport::{SmtpMode, Transport as MailTransport},
};

/// Something able to deliver a message to a user
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message to a user, with a plain text and an HTML body
    ///
    /// # Errors
    ///
    /// Returns an error if the user has no address or if the message could
    /// not be delivered
    async fn send(&self, user: &User, subject: &str, text: &str, html: &str)
    -> Result<(), Error>;
}

/// A message recorded by the [`MockNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// The ID of the recipient
    pub user_id: i64,

    /// The subject line
    pub subject: String,

    /// The plain text body
    pub text: String,

    /// The HTML body
    pub html: String,
}

/// A [`Notifier`] which records the messages instead of sending them
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl MockNotifier {
    /// Create a new, empty, [`MockNotifier`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The messages sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(
        &self,
        user: &User,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), Error> {
        let notification = SentNotification {
            user_id: user.id,
            subject: subject.to_owned(),
            text: text.to_owned(),
            html: html.to_owned(),
        };

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_messages() {
        let notifier = MockNotifier::new();
        let user = User {
            id: 2,
            username: "admin".to_owned(),
            first_name: "Admin".to_owned(),
            last_name: "User".to_owned(),
            email: Some("admin@example.com".to_owned()),
            deleted: false,
        };

        notifier
            .send(&user, "Hello", "Hello there", "<p>Hello there</p>")
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, 2);
        assert_eq!(sent[0].subject, "Hello");
    }
}
