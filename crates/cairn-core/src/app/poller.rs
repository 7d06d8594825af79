//! Status artifact poller
//!
//! Secondary completion signal for detached `cognify` calls. The poll is
//! bounded by a deadline and stops early when shutdown is signalled.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::JobId;
use crate::ports::{StatusArtifact, StatusArtifactStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Found(StatusArtifact),
    TimedOut,
    Cancelled,
}

pub async fn poll_status_artifact(
    store: &dyn StatusArtifactStore,
    job_id: JobId,
    interval: Duration,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> PollOutcome {
    let deadline = Instant::now() + timeout;

    loop {
        if *shutdown.borrow() {
            return PollOutcome::Cancelled;
        }

        match store.read(job_id).await {
            Ok(Some(artifact)) => return PollOutcome::Found(artifact),
            Ok(None) => {}
            Err(e) => {
                // 書きかけは atomic write で起きないはずだが、読めなければ次の周期で再試行
                tracing::warn!(job_id = %job_id, error = %e, "failed to read status artifact");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        let nap = interval.min(deadline - now);

        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return PollOutcome::Cancelled;
                }
            }
        }
    }
}
