//! IngestScheduler - background ingestion scheduler
//!
//! # 構成
//! - 状態（ledger の内容、pause/shutdown フラグ、走っている task）は 1 つの `Mutex` に置く
//! - dispatch は job ごとに `tokio::spawn`。結果は `JobOutcome` として mpsc で completion loop に送る
//! - completion loop だけが完了処理（ledger 更新 → persist → 次の dispatch → 通知）を行う
//!
//! # 不変条件
//! - `running` の job は `max_concurrent` 以下
//! - `pending` の `queue_position` は 0 から連番（FIFO 順）
//! - 同じ `(dataset_key, content_digest)` の job が同時に 2 つ in flight にならない
//! - payload は job の record より先に保存する
//!
//! 通知は ledger の persist 後、ロックの外で送る。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use super::builder::SchedulerDeps;
use super::config::{NotificationConfig, SchedulerConfig};
use super::notify_policy::NotificationPolicy;
use super::poller::{PollOutcome, poll_status_artifact};
use super::reconcile::{purge_expired, reconcile_running};
use super::status::SchedulerStatus;
use crate::domain::{
    CognifyReply, ErrorCode, IngestEnvelope, JobId, JobOutcome, JobRecord, JobStatus, OutcomeKind,
};
use crate::ports::{
    METHOD_CANCEL, METHOD_COGNIFY, Notification, PayloadStore, StatusArtifactStore, StoreError,
    WorkerGateway,
};

/// Stored on every job still running when the scheduler shuts down.
pub const SHUTDOWN_MESSAGE: &str = "Ingestion interrupted because the scheduler shut down";

/// Synchronous rejection of `submit`/`retry`. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("the scheduler is paused")]
    Paused,

    #[error("the scheduler is shutting down")]
    ShuttingDown,

    #[error("job {existing} is already ingesting the same content")]
    DuplicateInFlight { existing: JobId },

    #[error("the ingestion backlog is full ({capacity} jobs); try again in {retry_after_ms}ms")]
    BacklogFull { capacity: usize, retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job {job_id} is {status} and cannot be retried")]
    NotRetryable { job_id: JobId, status: JobStatus },

    #[error("the saved payload for job {job_id} is missing; submit the summary again")]
    PayloadMissing { job_id: JobId },
}

impl AdmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AdmissionError::Paused => ErrorCode::Paused,
            AdmissionError::ShuttingDown => ErrorCode::ShuttingDown,
            AdmissionError::DuplicateInFlight { .. } => ErrorCode::DuplicateInFlight,
            AdmissionError::BacklogFull { .. } => ErrorCode::BacklogFull,
            AdmissionError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AdmissionError::NotRetryable { .. } => ErrorCode::NotRetryable,
            AdmissionError::PayloadMissing { .. } => ErrorCode::PayloadMissing,
        }
    }

    /// Hint for `BACKLOG_FULL`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionError::BacklogFull { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// Admission code, if this is an admission rejection.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SchedulerError::Admission(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Result of an accepted `submit`/`retry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
}

impl SubmitReceipt {
    fn of(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            queue_position: job.queue_position,
        }
    }
}

struct SchedulerState {
    jobs: Vec<JobRecord>,
    paused: bool,
    shutting_down: bool,
    /// Dispatch tasks of running jobs.
    tasks: HashMap<JobId, AbortHandle>,
    policy: NotificationPolicy,
}

impl SchedulerState {
    fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    fn backlog(&self) -> usize {
        self.jobs.iter().filter(|j| j.status.is_in_flight()).count()
    }

    fn find(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn find_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn in_flight_duplicate(&self, dataset_key: &str, digest: &str, except: Option<JobId>) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| {
                j.status.is_in_flight()
                    && Some(j.id) != except
                    && j.same_content(dataset_key, digest)
            })
            .map(|j| j.id)
    }
}

/// Reassign `queue_position` 0..n over pending jobs in FIFO order.
fn renumber_pending(jobs: &mut [JobRecord]) {
    let mut pending: Vec<usize> = jobs
        .iter()
        .enumerate()
        .filter(|(_, j)| j.status == JobStatus::Pending)
        .map(|(i, _)| i)
        .collect();
    pending.sort_by_key(|&i| (jobs[i].queue_position.unwrap_or(u32::MAX), jobs[i].started_at));
    for (position, i) in pending.into_iter().enumerate() {
        jobs[i].queue_position = Some(position as u32);
    }
}

/// Index of the next pending job in FIFO order.
fn next_pending(jobs: &[JobRecord]) -> Option<usize> {
    jobs.iter()
        .enumerate()
        .filter(|(_, j)| j.status == JobStatus::Pending)
        .min_by_key(|(_, j)| (j.queue_position.unwrap_or(u32::MAX), j.started_at))
        .map(|(i, _)| i)
}

struct Inner {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    shutdown_tx: watch::Sender<bool>,
    /// Number of running jobs; `pause` and `shutdown` wait on it.
    running_tx: watch::Sender<usize>,
    /// Bumped after each completion has been persisted and notified.
    settled_tx: watch::Sender<u64>,
}

pub struct IngestScheduler {
    inner: Arc<Inner>,
    completion: StdMutex<Option<JoinHandle<()>>>,
}

impl IngestScheduler {
    /// Load, reconcile and persist the ledger, then start dispatching.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(
        deps: SchedulerDeps,
        config: SchedulerConfig,
        notifications: NotificationConfig,
    ) -> Result<Self, SchedulerError> {
        let config = config.normalized();
        let now = deps.clock.now();

        let mut jobs = deps.ledger.load().await?;
        let orphaned = reconcile_running(&mut jobs, deps.probe.as_ref(), now);
        let purged = purge_expired(
            &mut jobs,
            now,
            config.completed_retention(),
            config.other_retention(),
        );
        renumber_pending(&mut jobs);
        deps.ledger.save(&jobs).await?;

        for job in &purged {
            discard_job_files(deps.payloads.as_ref(), deps.artifacts.as_ref(), job.id).await;
        }

        let policy = NotificationPolicy::new(notifications.success_throttle());
        let reconcile_notice = policy.on_reconciled_unknown(orphaned.len());

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let (running_tx, _) = watch::channel(0usize);
        let (settled_tx, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            deps,
            config,
            state: Mutex::new(SchedulerState {
                jobs,
                paused: false,
                shutting_down: false,
                tasks: HashMap::new(),
                policy,
            }),
            outcome_tx,
            shutdown_tx,
            running_tx,
            settled_tx,
        });

        let completion = tokio::spawn(completion_loop(Arc::clone(&inner), outcome_rx));

        {
            let mut state = inner.state.lock().await;
            let launches = inner.promote_pending(&mut state);
            if !launches.is_empty() {
                inner.persist_logged(&state.jobs).await;
            }
            inner.launch(&mut state, launches);
            inner.publish_running(&state);
            tracing::info!(
                jobs = state.jobs.len(),
                running = state.running_count(),
                orphaned = orphaned.len(),
                purged = purged.len(),
                "ingest scheduler started"
            );
        }

        if let Some(notice) = reconcile_notice {
            inner.deps.notifier.show(notice).await;
        }

        Ok(Self {
            inner,
            completion: StdMutex::new(Some(completion)),
        })
    }

    /// Admit a job. Returns once the job is recorded; the dispatch runs in the background.
    pub async fn submit(
        &self,
        content_digest: &str,
        dataset_key: &str,
        payload: serde_json::Value,
    ) -> Result<SubmitReceipt, SchedulerError> {
        let inner = &self.inner;
        let content_digest = content_digest.trim();
        let dataset_key = dataset_key.trim();

        let mut state = inner.state.lock().await;
        if state.shutting_down {
            return Err(AdmissionError::ShuttingDown.into());
        }
        if content_digest.is_empty() || dataset_key.is_empty() {
            return Err(AdmissionError::InvalidRequest(
                "dataset key and content digest must not be empty".into(),
            )
            .into());
        }
        if state.paused {
            return Err(AdmissionError::Paused.into());
        }
        if let Some(existing) = state.in_flight_duplicate(dataset_key, content_digest, None) {
            return Err(AdmissionError::DuplicateInFlight { existing }.into());
        }
        inner.check_backlog(&state)?;

        let job_id = inner.deps.ids.generate_job_id();
        let now = inner.deps.clock.now();

        // payload を先に保存（直後に落ちても retry できるように）
        let payload_ref = inner.deps.payloads.put(job_id, &payload).await?;

        let mut job = JobRecord::new(job_id, dataset_key, content_digest, payload_ref, now);
        job.mark_pending(u32::MAX, now);
        state.jobs.push(job);

        let mut launches = inner.promote_pending(&mut state);
        if let Err(e) = inner.deps.ledger.save(&state.jobs).await {
            tracing::error!(job_id = %job_id, error = %e, "failed to persist ledger, rejecting job");
            state.jobs.retain(|j| j.id != job_id);
            renumber_pending(&mut state.jobs);
            launches.retain(|id| *id != job_id);
            inner.launch(&mut state, launches);
            inner.publish_running(&state);
            drop(state);
            if let Err(e) = inner.deps.payloads.delete(job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to delete payload of rejected job");
            }
            return Err(e.into());
        }
        inner.launch(&mut state, launches);
        inner.publish_running(&state);

        let receipt = state
            .find(job_id)
            .map(SubmitReceipt::of)
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        tracing::info!(
            job_id = %job_id,
            dataset_key,
            content_digest,
            status = %receipt.status,
            queue_position = ?receipt.queue_position,
            "job admitted"
        );
        Ok(receipt)
    }

    /// Re-admit a `failed` or `unknown` job with its saved payload.
    pub async fn retry(&self, job_id: JobId) -> Result<SubmitReceipt, SchedulerError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.shutting_down {
            return Err(AdmissionError::ShuttingDown.into());
        }
        if state.paused {
            return Err(AdmissionError::Paused.into());
        }

        let job = state.find(job_id).ok_or(SchedulerError::JobNotFound(job_id))?;
        if !job.status.is_retryable() {
            return Err(AdmissionError::NotRetryable {
                job_id,
                status: job.status,
            }
            .into());
        }
        if let Some(existing) =
            state.in_flight_duplicate(&job.dataset_key, &job.content_digest, Some(job_id))
        {
            return Err(AdmissionError::DuplicateInFlight { existing }.into());
        }
        inner.check_backlog(&state)?;

        if inner.deps.payloads.get(job_id).await?.is_none() {
            tracing::warn!(job_id = %job_id, "retry refused, payload is missing");
            return Err(AdmissionError::PayloadMissing { job_id }.into());
        }
        if let Err(e) = inner.deps.artifacts.delete(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to delete stale status artifact");
        }

        let now = inner.deps.clock.now();
        if let Some(job) = state.find_mut(job_id) {
            job.reset_for_retry(now);
            job.mark_pending(u32::MAX, now);
        }

        let launches = inner.promote_pending(&mut state);
        let persisted = inner.deps.ledger.save(&state.jobs).await;
        inner.launch(&mut state, launches);
        inner.publish_running(&state);
        persisted?;

        let receipt = state
            .find(job_id)
            .map(SubmitReceipt::of)
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        tracing::info!(job_id = %job_id, status = %receipt.status, "job re-admitted");
        Ok(receipt)
    }

    /// Stop new dispatches and wait for running jobs to drain.
    ///
    /// Returns `true` on a clean drain, `false` if `timeout` elapsed first.
    pub async fn pause(&self, timeout: Duration) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            state.paused = true;
        }
        tracing::info!("ingest scheduler paused");
        let mut running = self.inner.running_tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, running.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        )
    }

    /// Clear the pause flag and dispatch whatever is pending.
    pub async fn resume(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !state.paused {
            return;
        }
        state.paused = false;
        let launches = inner.promote_pending(&mut state);
        if !launches.is_empty() {
            inner.persist_logged(&state.jobs).await;
        }
        inner.launch(&mut state, launches);
        inner.publish_running(&state);
        tracing::info!("ingest scheduler resumed");
    }

    /// Terminate running jobs and persist a final ledger.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock().await;
            if state.shutting_down {
                return Ok(());
            }
            state.shutting_down = true;
            tracing::info!(running = state.running_count(), "ingest scheduler shutting down");
        }

        // running task は cancel を送り、grace の間は応答を待つ
        inner.shutdown_tx.send_replace(true);
        let mut running = inner.running_tx.subscribe();
        let drained = matches!(
            tokio::time::timeout(inner.config.shutdown_grace(), running.wait_for(|n| *n == 0))
                .await,
            Ok(Ok(_))
        );

        let mut state = inner.state.lock().await;
        for (job_id, handle) in state.tasks.drain() {
            tracing::warn!(job_id = %job_id, "aborting dispatch after grace period");
            handle.abort();
        }
        let now = inner.deps.clock.now();
        let mut terminated = 0usize;
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Running)
        {
            job.mark_terminated(SHUTDOWN_MESSAGE, now);
            terminated += 1;
        }
        inner.publish_running(&state);
        let persisted = inner.deps.ledger.save(&state.jobs).await;
        drop(state);

        if let Some(handle) = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        inner.settled_tx.send_modify(|v| *v += 1);
        tracing::info!(drained, terminated, "ingest scheduler stopped");
        persisted.map_err(SchedulerError::from)
    }

    pub async fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.inner.state.lock().await.find(job_id).cloned()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.inner.state.lock().await.jobs.clone()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().await;
        SchedulerStatus::from_jobs(&state.jobs, state.paused)
    }

    /// Drop jobs past their retention window; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, SchedulerError> {
        let inner = &self.inner;
        let purged = {
            let mut state = inner.state.lock().await;
            let now = inner.deps.clock.now();
            let purged = purge_expired(
                &mut state.jobs,
                now,
                inner.config.completed_retention(),
                inner.config.other_retention(),
            );
            if purged.is_empty() {
                return Ok(0);
            }
            inner.deps.ledger.save(&state.jobs).await?;
            purged
        };
        for job in &purged {
            discard_job_files(inner.deps.payloads.as_ref(), inner.deps.artifacts.as_ref(), job.id)
                .await;
        }
        Ok(purged.len())
    }

    /// Wait until the job leaves `pending`/`running`.
    ///
    /// `None` when the job does not exist or `timeout` elapses first.
    pub async fn wait_settled(&self, job_id: JobId, timeout: Duration) -> Option<JobRecord> {
        let mut settled = self.inner.settled_tx.subscribe();
        let wait = async {
            loop {
                match self.job(job_id).await {
                    None => return None,
                    Some(job) if job.status.is_terminal() => return Some(job),
                    Some(_) => {}
                }
                if settled.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

impl Drop for IngestScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Inner {
    fn check_backlog(&self, state: &SchedulerState) -> Result<(), AdmissionError> {
        let capacity = self.config.backlog_capacity();
        if state.backlog() >= capacity {
            return Err(AdmissionError::BacklogFull {
                capacity,
                retry_after_ms: self.config.backlog_retry_after_ms,
            });
        }
        Ok(())
    }

    /// Move pending jobs to `running` while slots are free. Returns the ids to launch.
    fn promote_pending(&self, state: &mut SchedulerState) -> Vec<JobId> {
        let mut launches = Vec::new();
        if !state.paused && !state.shutting_down {
            let now = self.deps.clock.now();
            let pid = self.deps.probe.current_pid();
            while state.running_count() < self.config.max_concurrent {
                let Some(i) = next_pending(&state.jobs) else {
                    break;
                };
                state.jobs[i].mark_running(pid, now);
                launches.push(state.jobs[i].id);
            }
        }
        renumber_pending(&mut state.jobs);
        launches
    }

    /// Spawn dispatch tasks. Call after the ledger reflects `running`.
    fn launch(&self, state: &mut SchedulerState, launches: Vec<JobId>) {
        for job_id in launches {
            let Some(job) = state.find(job_id) else {
                continue;
            };
            let dispatch = Dispatch {
                job_id,
                dataset_key: job.dataset_key.clone(),
                content_digest: job.content_digest.clone(),
                gateway: Arc::clone(&self.deps.gateway),
                payloads: Arc::clone(&self.deps.payloads),
                artifacts: Arc::clone(&self.deps.artifacts),
                timeout: self.config.ingest_timeout(),
                grace: self.config.shutdown_grace(),
                poll_interval: self.config.status_poll_interval(),
                poll_timeout: self.config.status_poll_timeout(),
                shutdown: self.shutdown_tx.subscribe(),
            };

            let task = tokio::spawn(dispatch.run());
            let abort = task.abort_handle();
            let outcome_tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        tracing::error!(job_id = %job_id, "dispatch task panicked");
                        JobOutcome::failed_with(
                            job_id,
                            ErrorCode::InternalError,
                            "the dispatch task panicked",
                        )
                    }
                    Err(_) => JobOutcome::interrupted(job_id),
                };
                let _ = outcome_tx.send(outcome);
            });

            tracing::debug!(job_id = %job_id, "dispatch started");
            state.tasks.insert(job_id, abort);
        }
    }

    fn publish_running(&self, state: &SchedulerState) {
        self.running_tx.send_replace(state.running_count());
    }

    async fn persist_logged(&self, jobs: &[JobRecord]) {
        if let Err(e) = self.deps.ledger.save(jobs).await {
            tracing::error!(error = %e, "failed to persist ledger");
        }
    }

    async fn handle_outcome(&self, outcome: JobOutcome) {
        let job_id = outcome.job_id;
        let mut notices: Vec<Notification> = Vec::new();
        let mut succeeded = false;

        {
            let mut state = self.state.lock().await;
            state.tasks.remove(&job_id);
            let now = self.deps.clock.now();
            let shutting_down = state.shutting_down;

            let SchedulerState { jobs, policy, .. } = &mut *state;
            let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
                tracing::warn!(job_id = %job_id, "outcome for a job no longer in the ledger");
                return;
            };
            if job.status != JobStatus::Running {
                tracing::debug!(job_id = %job_id, status = %job.status, "late outcome ignored");
                return;
            }

            match outcome.kind {
                OutcomeKind::Completed {
                    entity_count,
                    elapsed_ms,
                } => {
                    job.mark_completed(entity_count, elapsed_ms, now);
                    succeeded = true;
                    tracing::info!(job_id = %job_id, entity_count, elapsed_ms, "job completed");
                    notices.extend(policy.on_success(now, job));
                }
                OutcomeKind::Failed { .. } | OutcomeKind::Interrupted if shutting_down => {
                    job.mark_terminated(SHUTDOWN_MESSAGE, now);
                    tracing::info!(job_id = %job_id, "job terminated by shutdown");
                }
                OutcomeKind::Failed { code, message } => {
                    tracing::error!(job_id = %job_id, error_code = %code, error = %message, "job failed");
                    job.mark_failed(&code, message, now);
                    notices.push(policy.on_failure(job));
                }
                OutcomeKind::Interrupted => {
                    tracing::error!(job_id = %job_id, "dispatch task stopped without an outcome");
                    job.mark_failed(
                        ErrorCode::InternalError.as_str(),
                        "the dispatch task stopped without an outcome",
                        now,
                    );
                    notices.push(policy.on_failure(job));
                }
            }

            let launches = self.promote_pending(&mut state);
            self.persist_logged(&state.jobs).await;
            self.launch(&mut state, launches);
            self.publish_running(&state);
        }

        if succeeded {
            discard_job_files(self.deps.payloads.as_ref(), self.deps.artifacts.as_ref(), job_id)
                .await;
        }
        for notice in notices {
            self.deps.notifier.show(notice).await;
        }
        self.settled_tx.send_modify(|v| *v += 1);
    }
}

async fn completion_loop(inner: Arc<Inner>, mut outcomes: mpsc::UnboundedReceiver<JobOutcome>) {
    while let Some(outcome) = outcomes.recv().await {
        inner.handle_outcome(outcome).await;
    }
}

async fn discard_job_files(payloads: &dyn PayloadStore, artifacts: &dyn StatusArtifactStore, job_id: JobId) {
    if let Err(e) = payloads.delete(job_id).await {
        tracing::warn!(job_id = %job_id, error = %e, "failed to delete payload");
    }
    if let Err(e) = artifacts.delete(job_id).await {
        tracing::warn!(job_id = %job_id, error = %e, "failed to delete status artifact");
    }
}

/// One job's trip through the worker gateway.
struct Dispatch {
    job_id: JobId,
    dataset_key: String,
    content_digest: String,
    gateway: Arc<dyn WorkerGateway>,
    payloads: Arc<dyn PayloadStore>,
    artifacts: Arc<dyn StatusArtifactStore>,
    timeout: Duration,
    grace: Duration,
    poll_interval: Duration,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Dispatch {
    async fn run(mut self) -> JobOutcome {
        let job_id = self.job_id;

        // 実行経路は 1 つだけ。fallback はしない
        if !self.gateway.is_enabled() {
            return JobOutcome::failed_with(
                job_id,
                ErrorCode::GatewayDisabled,
                "the memory worker is disabled",
            );
        }
        if !self.gateway.is_healthy() {
            return JobOutcome::failed_with(
                job_id,
                ErrorCode::GatewayUnhealthy,
                "the memory worker is not healthy",
            );
        }

        let payload = match self.payloads.get(job_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                return JobOutcome::failed_with(
                    job_id,
                    ErrorCode::PayloadMissing,
                    "the saved payload is missing",
                );
            }
            Err(e) => {
                return JobOutcome::failed_with(job_id, ErrorCode::InternalError, e.to_string());
            }
        };

        let envelope = IngestEnvelope::new(job_id, &self.dataset_key, &self.content_digest, payload);
        let gateway = Arc::clone(&self.gateway);
        let started = Instant::now();
        let reply = {
            let call = tokio::time::timeout(
                self.timeout,
                gateway.send_request(METHOD_COGNIFY, envelope.to_params(), self.timeout),
            );
            tokio::pin!(call);
            tokio::select! {
                reply = &mut call => reply,
                _ = shutdown_signalled(&mut self.shutdown) => {
                    send_cancel(gateway.as_ref(), job_id, self.grace).await;
                    call.await
                }
            }
        };

        let result = match reply {
            Err(_elapsed) => {
                return JobOutcome::failed_with(
                    job_id,
                    ErrorCode::Timeout,
                    format!(
                        "the memory worker did not respond within {}s",
                        self.timeout.as_secs()
                    ),
                );
            }
            Ok(Err(e)) => return JobOutcome::from_gateway_error(job_id, e),
            Ok(Ok(result)) => result,
        };

        match CognifyReply::from_result(&result) {
            CognifyReply::Completed { entity_count } => {
                JobOutcome::completed(job_id, entity_count, started.elapsed().as_millis() as u64)
            }
            CognifyReply::Detached => {
                tracing::debug!(job_id = %job_id, "cognify detached, polling status artifact");
                self.await_artifact().await
            }
        }
    }

    async fn await_artifact(&mut self) -> JobOutcome {
        let job_id = self.job_id;
        match poll_status_artifact(
            self.artifacts.as_ref(),
            job_id,
            self.poll_interval,
            self.poll_timeout,
            &mut self.shutdown,
        )
        .await
        {
            PollOutcome::Found(artifact) if artifact.success => {
                JobOutcome::completed(job_id, artifact.entity_count, artifact.elapsed_ms)
            }
            PollOutcome::Found(artifact) => JobOutcome::failed(
                job_id,
                artifact
                    .error_code
                    .unwrap_or_else(|| "WORKER_FAILED".to_string()),
                artifact
                    .error_message
                    .unwrap_or_else(|| "the memory worker reported a failure".to_string()),
            ),
            PollOutcome::TimedOut => JobOutcome::failed_with(
                job_id,
                ErrorCode::Timeout,
                "no completion status was written in time",
            ),
            PollOutcome::Cancelled => JobOutcome::interrupted(job_id),
        }
    }

}

/// Best-effort termination signal, bounded by the grace period.
async fn send_cancel(gateway: &dyn WorkerGateway, job_id: JobId, grace: Duration) {
    let params = serde_json::json!({ "job_id": job_id });
    if let Err(e) = gateway.send_request(METHOD_CANCEL, params, grace).await {
        tracing::warn!(job_id = %job_id, error = %e, "cancel request failed");
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
