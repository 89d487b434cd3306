// ── Notification sink ─────────────────────────────────────────────────────────
//
// Every state transition (connect, reconnect, file created / changed /
// deleted, upload or delete outcome) is reported through a sink supplied by
// the host.  The CLI routes them into the log; an editor host would show them
// as toasts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver for human-readable notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);

    fn info(&self, message: &str) {
        self.notify(Notification::new(NotificationLevel::Info, message));
    }

    fn warning(&self, message: &str) {
        self.notify(Notification::new(NotificationLevel::Warning, message));
    }

    fn error(&self, message: &str) {
        self.notify(Notification::new(NotificationLevel::Error, message));
    }
}

// ── Log-backed sink ──────────────────────────────────────────────────────────

/// Forwards notifications to the `log` facade under the `rumo::notify` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => log::info!(target: "rumo::notify", "{}", notification.message),
            NotificationLevel::Warning => log::warn!(target: "rumo::notify", "{}", notification.message),
            NotificationLevel::Error => log::error!(target: "rumo::notify", "{}", notification.message),
        }
    }
}

// ── Capturing sink ───────────────────────────────────────────────────────────

/// Keeps every notification in memory, for hosts that poll for messages.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    entries: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages at `level`, oldest first.
    pub fn messages(&self, level: NotificationLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.message)
            .collect()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.messages(level).len()
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl NotificationSink for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_notifier_filters_by_level() {
        let sink = MemoryNotifier::new();
        sink.info("connected");
        sink.error("upload failed");
        sink.info("uploaded");

        assert_eq!(sink.count(NotificationLevel::Info), 2);
        assert_eq!(sink.messages(NotificationLevel::Error), vec!["upload failed"]);
        assert_eq!(sink.count(NotificationLevel::Warning), 0);
    }

    #[test]
    fn take_drains_entries() {
        let sink = MemoryNotifier::new();
        sink.warning("slow");
        assert_eq!(sink.take().len(), 1);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn notification_serializes_camel_case_level() {
        let n = Notification::new(NotificationLevel::Warning, "x");
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"level\":\"warning\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn sink_is_object_safe() {
        let sink: Box<dyn NotificationSink> = Box::new(MemoryNotifier::new());
        sink.info("works through a trait object");
    }
}
