//! Job state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an ingestion job.
///
/// State transitions:
/// - Pending -> Running -> Completed | Failed
/// - Running -> Terminated (scheduler shutdown only)
/// - Running -> Unknown (start-up reconciliation only)
/// - Failed | Unknown -> Pending | Running (explicit retry only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, waiting for a free slot.
    Pending,

    /// Dispatched to the worker gateway.
    Running,

    /// Worker reported success.
    Completed,

    /// Worker (or the dispatch path) reported an error.
    Failed,

    /// Interrupted by scheduler shutdown.
    Terminated,

    /// Found `running` after a restart; the call cannot be reattached.
    Unknown,
}

impl JobStatus {
    /// Occupies backlog capacity and participates in de-duplication.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// Eligible for an explicit `retry`.
    pub fn is_retryable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Unknown)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Terminated)
                | (Running, Unknown)
                | (Failed, Pending)
                | (Failed, Running)
                | (Unknown, Pending)
                | (Unknown, Running)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Terminated => "terminated",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::dispatch(JobStatus::Pending, JobStatus::Running, true)]
    #[case::success(JobStatus::Running, JobStatus::Completed, true)]
    #[case::failure(JobStatus::Running, JobStatus::Failed, true)]
    #[case::shutdown(JobStatus::Running, JobStatus::Terminated, true)]
    #[case::crash(JobStatus::Running, JobStatus::Unknown, true)]
    #[case::retry_failed(JobStatus::Failed, JobStatus::Pending, true)]
    #[case::retry_unknown(JobStatus::Unknown, JobStatus::Running, true)]
    #[case::skip_running(JobStatus::Pending, JobStatus::Completed, false)]
    #[case::resurrect_completed(JobStatus::Completed, JobStatus::Pending, false)]
    #[case::retry_terminated(JobStatus::Terminated, JobStatus::Pending, false)]
    #[case::pending_unknown(JobStatus::Pending, JobStatus::Unknown, false)]
    fn transitions(#[case] from: JobStatus, #[case] to: JobStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn serializes_snake_case() {
        let s = serde_json::to_string(&JobStatus::Terminated).unwrap();
        assert_eq!(s, "\"terminated\"");
    }

    #[test]
    fn only_pending_and_running_are_in_flight() {
        assert!(JobStatus::Pending.is_in_flight());
        assert!(JobStatus::Running.is_in_flight());
        assert!(!JobStatus::Failed.is_in_flight());
        assert!(JobStatus::Unknown.is_terminal());
    }
}
