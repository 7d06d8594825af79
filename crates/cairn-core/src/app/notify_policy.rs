//! NotificationPolicy - 通知の間引き
//!
//! - 成功: `success_throttle` ごとに最大 1 件。窓の中の成功は数えておき、次の通知にまとめる
//! - 失敗: 間引かない。Retry と View Logs を付ける
//! - 再起動時の照合で unknown になった job: まとめて 1 件の warning

use chrono::{DateTime, Utc};

use crate::domain::JobRecord;
use crate::ports::{Notification, NotificationAction};

#[derive(Debug)]
pub struct NotificationPolicy {
    throttle: chrono::Duration,
    last_success_at: Option<DateTime<Utc>>,
    suppressed: u32,
}

impl NotificationPolicy {
    pub fn new(throttle: std::time::Duration) -> Self {
        Self {
            throttle: chrono::Duration::from_std(throttle).unwrap_or(chrono::Duration::zero()),
            last_success_at: None,
            suppressed: 0,
        }
    }

    /// `None` while inside the throttle window.
    pub fn on_success(&mut self, now: DateTime<Utc>, job: &JobRecord) -> Option<Notification> {
        if let Some(last) = self.last_success_at
            && now - last < self.throttle
        {
            self.suppressed += 1;
            return None;
        }

        let count = self.suppressed + 1;
        self.suppressed = 0;
        self.last_success_at = Some(now);

        let message = if count == 1 {
            match job.result_entity_count {
                Some(n) => format!("Summary added to memory ({n} entities)"),
                None => "Summary added to memory".to_string(),
            }
        } else {
            format!("{count} summaries added to memory")
        };
        Some(Notification::info(message))
    }

    pub fn on_failure(&self, job: &JobRecord) -> Notification {
        let code = job.error_code.as_deref().unwrap_or("UNKNOWN");
        let mut message = format!("Memory ingestion failed ({code})");
        if let Some(detail) = &job.error_message {
            message.push_str(": ");
            message.push_str(detail);
        }
        if let Some(hint) = &job.remediation {
            message.push(' ');
            message.push_str(hint);
        }
        Notification::warning(message)
            .with_action(NotificationAction::Retry { job_id: job.id })
            .with_action(NotificationAction::ViewLogs)
    }

    pub fn on_reconciled_unknown(&self, count: usize) -> Option<Notification> {
        if count == 0 {
            return None;
        }
        let noun = if count == 1 { "job was" } else { "jobs were" };
        Some(
            Notification::warning(format!(
                "{count} memory ingestion {noun} interrupted by a restart and need attention"
            ))
            .with_action(NotificationAction::ViewStatus),
        )
    }

    /// Successes held back since the last emitted success.
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}
