//! User-visible notifications.

use serde::{Deserialize, Serialize};

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Confirmation of a user action.
    Info,
    /// Something failed.
    Error,
}

/// A user-visible toast: short title plus a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,
    /// Short heading.
    pub title: String,
    /// Human-readable detail.
    pub description: String,
}

impl Notification {
    /// An informational notification.
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    /// An error notification.
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Surface that shows notifications to the user.
pub trait Notifier: Send + Sync {
    /// Shows `notification`. Must not block.
    fn notify(&self, notification: Notification);
}

/// Notifier that only writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => tracing::info!(
                title = %notification.title,
                description = %notification.description,
                "Notification shown"
            ),
            NotificationLevel::Error => tracing::warn!(
                title = %notification.title,
                description = %notification.description,
                "Error notification shown"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_level() {
        assert_eq!(Notification::error("Error", "boom").level, NotificationLevel::Error);
        assert_eq!(
            Notification::info("Files attached", "1 file(s) attached").level,
            NotificationLevel::Info
        );
    }

    #[test]
    fn tracing_notifier_accepts_both_levels() {
        let notifier = TracingNotifier;
        notifier.notify(Notification::info("a", "b"));
        notifier.notify(Notification::error("c", "d"));
    }
}
