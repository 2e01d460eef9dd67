// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbound notifications for drained queue entries.
//!
//! The flush worker only knows [`NotificationSender`]. [`LogSender`] is the
//! default; [`SmtpSender`] (feature `smtp`) mails the message body.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),
    #[error("Notification transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes each notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        info!(recipient, message, "Notification sent");
        Ok(())
    }
}

/// Keeps every notification in memory. Handy for tests and demos.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, message)` pairs in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Make every following send fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Transport("recording sender set to fail".into()));
        }
        self.sent.lock().push((recipient.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(feature = "smtp")]
pub use smtp::{SmtpConfig, SmtpSender};

#[cfg(feature = "smtp")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::{header::ContentType, Mailbox};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
    use serde::Deserialize;

    use super::{NotificationSender, NotifyError};

    fn default_port() -> u16 {
        587
    }

    fn default_subject() -> String {
        "Shop notification".to_string()
    }

    /// SMTP relay settings.
    #[derive(Debug, Clone, Deserialize)]
    pub struct SmtpConfig {
        pub host: String,
        #[serde(default = "default_port")]
        pub port: u16,
        pub username: String,
        pub password: String,
        /// Sender address, usually the same as `username`
        pub from_address: String,
        #[serde(default = "default_subject")]
        pub subject: String,
    }

    /// Mails each notification through a STARTTLS relay.
    #[derive(Clone)]
    pub struct SmtpSender {
        mailer: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
        subject: String,
    }

    impl SmtpSender {
        pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
            let credentials = Credentials::new(config.username.clone(), config.password.clone());

            let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Transport(e.to_string()))?
                .port(config.port)
                .credentials(credentials)
                .build();

            let from = config
                .from_address
                .parse()
                .map_err(|_| NotifyError::InvalidRecipient(config.from_address.clone()))?;

            Ok(Self { mailer, from, subject: config.subject.clone() })
        }
    }

    #[async_trait]
    impl NotificationSender for SmtpSender {
        async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
            let to: Mailbox = recipient
                .parse()
                .map_err(|_| NotifyError::InvalidRecipient(recipient.to_string()))?;

            let email = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(self.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(message.to_string())
                .map_err(|e| NotifyError::Transport(e.to_string()))?;

            self.mailer
                .send(email)
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        LogSender.send("a@example.com", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_recording_sender() {
        let sender = RecordingSender::new();
        sender.send("a@example.com", "one").await.unwrap();

        sender.set_failing(true);
        assert!(sender.send("b@example.com", "two").await.is_err());
        sender.set_failing(false);

        assert_eq!(sender.sent(), vec![("a@example.com".to_string(), "one".to_string())]);
    }
}
