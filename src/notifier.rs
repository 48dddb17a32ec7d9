//! Notification sinks for human-readable messages
//!
//! The engine produces a title and body for mapping problems, watch failures
//! and copy results; where they end up is up to the host.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub text: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            text: text.into(),
        }
    }

    pub fn warning(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            title: title.into(),
            text: text.into(),
        }
    }

    pub fn error(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Receiver of user-facing notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => {
                info!(target: "copywatch::notify", "{}: {}", notification.title, notification.text)
            }
            NotificationLevel::Warning => {
                warn!(target: "copywatch::notify", "{}: {}", notification.title, notification.text)
            }
            NotificationLevel::Error => {
                error!(target: "copywatch::notify", "{}: {}", notification.title, notification.text)
            }
        }
    }
}

/// Forwards notifications over a channel to a host-side consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped, message discarded");
        }
    }
}
