//! Status - editor の status indicator 向けスナップショット

use serde::{Deserialize, Serialize};

use crate::domain::{JobRecord, JobStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    pub unknown: usize,
    pub paused: bool,
}

impl SchedulerStatus {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a JobRecord>, paused: bool) -> Self {
        let mut counts = SchedulerStatus {
            paused,
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Running => counts.running += 1,
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Terminated => counts.terminated += 1,
                JobStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// Running + pending.
    pub fn backlog(&self) -> usize {
        self.running + self.pending
    }

    /// Jobs that need the user's attention.
    pub fn needs_attention(&self) -> usize {
        self.failed + self.unknown
    }
}
