//! TracingNotificationSink - notifications as log lines (headless / CLI use).

use async_trait::async_trait;

use crate::ports::{Notification, NotificationSink, Severity};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn show(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => tracing::info!(target: "cairn::notify", "{notification}"),
            Severity::Warning => tracing::warn!(target: "cairn::notify", "{notification}"),
        }
    }
}
