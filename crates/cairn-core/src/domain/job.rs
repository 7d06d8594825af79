//! Job record: one row of the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::remediation_for;
use super::ids::JobId;
use super::state::JobStatus;

/// One ingestion attempt tracked through the scheduler's state machine.
///
/// Design:
/// - This is the single source of truth for a job; the ledger is a `Vec` of these.
/// - State transitions happen through methods, not direct field writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub dataset_key: String,
    pub content_digest: String,
    pub status: JobStatus,

    /// Defined only while `Pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,

    /// Admission time; FIFO tie-breaker among pending jobs.
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    /// When the job was handed to the worker gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_entity_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,

    /// Pointer into the payload store; cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,

    /// Process that owned the job while it was running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,

    #[serde(default)]
    pub retry_count: u32,
}

impl JobRecord {
    /// New job, not yet placed (`Pending` without a position).
    pub fn new(
        id: JobId,
        dataset_key: impl Into<String>,
        content_digest: impl Into<String>,
        payload_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            dataset_key: dataset_key.into(),
            content_digest: content_digest.into(),
            status: JobStatus::Pending,
            queue_position: None,
            started_at: now,
            last_updated_at: now,
            dispatched_at: None,
            elapsed_ms: None,
            result_entity_count: None,
            error_code: None,
            error_message: None,
            remediation: None,
            payload_ref: Some(payload_ref.into()),
            owner_pid: None,
            retry_count: 0,
        }
    }

    /// Same `(dataset_key, content_digest)` pair.
    pub fn same_content(&self, dataset_key: &str, content_digest: &str) -> bool {
        self.dataset_key == dataset_key && self.content_digest == content_digest
    }

    /// Place in the pending queue. Also used to renumber an already pending job.
    pub fn mark_pending(&mut self, position: u32, now: DateTime<Utc>) {
        if self.status != JobStatus::Pending {
            self.check_transition(JobStatus::Pending);
        }
        self.status = JobStatus::Pending;
        self.queue_position = Some(position);
        self.last_updated_at = now;
    }

    /// Dispatch: Pending -> Running.
    pub fn mark_running(&mut self, owner_pid: u32, now: DateTime<Utc>) {
        self.check_transition(JobStatus::Running);
        self.status = JobStatus::Running;
        self.queue_position = None;
        self.owner_pid = Some(owner_pid);
        self.dispatched_at = Some(now);
        self.last_updated_at = now;
    }

    pub fn mark_completed(&mut self, entity_count: u64, elapsed_ms: u64, now: DateTime<Utc>) {
        self.check_transition(JobStatus::Completed);
        self.status = JobStatus::Completed;
        self.result_entity_count = Some(entity_count);
        self.elapsed_ms = Some(elapsed_ms);
        self.error_code = None;
        self.error_message = None;
        self.remediation = None;
        self.payload_ref = None;
        self.last_updated_at = now;
    }

    pub fn mark_failed(&mut self, code: &str, message: impl Into<String>, now: DateTime<Utc>) {
        self.check_transition(JobStatus::Failed);
        self.status = JobStatus::Failed;
        self.elapsed_ms = self.elapsed_since_dispatch(now);
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.into());
        self.remediation = Some(remediation_for(code).to_string());
        self.last_updated_at = now;
    }

    pub fn mark_terminated(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.check_transition(JobStatus::Terminated);
        self.status = JobStatus::Terminated;
        self.elapsed_ms = self.elapsed_since_dispatch(now);
        self.error_message = Some(message.into());
        self.last_updated_at = now;
    }

    pub fn mark_unknown(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.check_transition(JobStatus::Unknown);
        self.status = JobStatus::Unknown;
        self.error_message = Some(message.into());
        self.last_updated_at = now;
    }

    /// Reset for re-admission after an explicit retry.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        debug_assert!(
            self.status.is_retryable(),
            "retry of a {} job {}",
            self.status,
            self.id
        );
        self.retry_count += 1;
        self.started_at = now;
        self.last_updated_at = now;
        self.dispatched_at = None;
        self.elapsed_ms = None;
        self.result_entity_count = None;
        self.error_code = None;
        self.error_message = None;
        self.remediation = None;
        self.owner_pid = None;
    }

    fn check_transition(&self, next: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {} for {}",
            self.status,
            next,
            self.id
        );
    }

    fn elapsed_since_dispatch(&self, now: DateTime<Utc>) -> Option<u64> {
        self.dispatched_at
            .map(|at| (now - at).num_milliseconds().max(0) as u64)
    }

    /// Whether the job is past its retention window.
    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        completed_retention: chrono::Duration,
        other_retention: chrono::Duration,
    ) -> bool {
        let retention = match self.status {
            JobStatus::Pending | JobStatus::Running => return false,
            JobStatus::Completed => completed_retention,
            _ => other_retention,
        };
        now - self.last_updated_at > retention
    }
}
