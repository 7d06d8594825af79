//! Reconcile - 起動時の照合と retention による回収
//!
//! # 照合
//! ledger に `running` で残っている job はすべて `unknown` にする。再開はしない
//! （この scheduler が await していない worker 呼び出しには再接続できない）。
//! owner pid がまだ生きていても同じ扱い。生きているかどうかはログに残すだけ。
//!
//! # 回収
//! retention を過ぎた terminal な job を ledger から外す。payload の削除は呼び出し側。

use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobRecord, JobStatus};
use crate::ports::ProcessProbe;

pub const INTERRUPTED_MESSAGE: &str =
    "This ingestion was still running when the scheduler restarted and cannot be resumed";

/// Mark every `running` job `unknown`; returns their ids.
///
/// Runs before this scheduler dispatches anything, so no `running` job in the
/// ledger can be one whose call this process is awaiting.
pub fn reconcile_running(
    jobs: &mut [JobRecord],
    probe: &dyn ProcessProbe,
    now: DateTime<Utc>,
) -> Vec<JobId> {
    let me = probe.current_pid();
    let mut orphaned = Vec::new();

    for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
        // 自分の pid が記録されていれば pid の再利用
        let owner_alive = job
            .owner_pid
            .is_some_and(|pid| pid != me && probe.is_alive(pid));
        if owner_alive {
            tracing::warn!(job_id = %job.id, owner_pid = ?job.owner_pid, "running job owned by another live process marked unknown");
        } else {
            tracing::warn!(job_id = %job.id, owner_pid = ?job.owner_pid, "orphaned running job marked unknown");
        }
        job.mark_unknown(INTERRUPTED_MESSAGE, now);
        orphaned.push(job.id);
    }
    orphaned
}

/// Remove expired jobs from the ledger and return them.
pub fn purge_expired(
    jobs: &mut Vec<JobRecord>,
    now: DateTime<Utc>,
    completed_retention: chrono::Duration,
    other_retention: chrono::Duration,
) -> Vec<JobRecord> {
    let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(jobs)
        .into_iter()
        .partition(|j| j.is_expired(now, completed_retention, other_retention));
    *jobs = kept;
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "purged expired jobs");
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use ulid::Ulid;

    struct FakeProbe {
        me: u32,
        alive: HashSet<u32>,
    }

    impl ProcessProbe for FakeProbe {
        fn current_pid(&self) -> u32 {
            self.me
        }
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.contains(&pid)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn running(pid: Option<u32>) -> JobRecord {
        let mut j = JobRecord::new(JobId::from_ulid(Ulid::new()), "ds", "d", "p", t0());
        j.mark_running(pid.unwrap_or(0), t0());
        j.owner_pid = pid;
        j
    }

    #[test]
    fn every_running_job_becomes_unknown() {
        let probe = FakeProbe {
            me: 10,
            alive: HashSet::from([20]),
        };
        let mut jobs = vec![running(Some(99_999)), running(Some(20)), running(None)];
        let orphaned = reconcile_running(&mut jobs, &probe, t0());

        assert_eq!(orphaned, vec![jobs[0].id, jobs[1].id, jobs[2].id]);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Unknown));
        assert!(jobs.iter().all(|j| !j.status.is_in_flight()));
    }

    #[test]
    fn pending_jobs_are_left_alone() {
        let probe = FakeProbe {
            me: 10,
            alive: HashSet::new(),
        };
        let mut jobs = vec![JobRecord::new(JobId::from_ulid(Ulid::new()), "ds", "d", "p", t0())];
        assert!(reconcile_running(&mut jobs, &probe, t0()).is_empty());
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[test]
    fn own_pid_counts_as_reused() {
        let probe = FakeProbe {
            me: 10,
            alive: HashSet::from([10]),
        };
        let mut jobs = vec![running(Some(10))];
        reconcile_running(&mut jobs, &probe, t0());
        assert_eq!(jobs[0].status, JobStatus::Unknown);
    }

    #[test]
    fn purge_respects_status_specific_retention() {
        let mut done = running(Some(1));
        done.mark_completed(1, 1, t0());
        let mut failed = running(Some(1));
        failed.mark_failed("X", "y", t0());
        let pending = JobRecord::new(JobId::from_ulid(Ulid::new()), "ds", "e", "p", t0());

        let mut jobs = vec![done.clone(), failed.clone(), pending.clone()];
        let purged = purge_expired(
            &mut jobs,
            t0() + Duration::hours(48),
            Duration::hours(24),
            Duration::days(7),
        );

        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, done.id);
        assert_eq!(jobs.len(), 2);
    }
}
