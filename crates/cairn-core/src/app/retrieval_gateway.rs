//! RetrievalGateway - retrieval の流量制御
//!
//! worker process を重なった読み込みから守る。
//!
//! # 受け付け（`retrieve`）
//! 1. 空のクエリは `INVALID_REQUEST`
//! 2. 直近 60 秒の dispatch 数 + 待ち行列の数が `rate_per_minute` 以上なら `RATE_LIMIT_EXCEEDED`
//! 3. 待ち行列が `max_queue_size` に達していれば `QUEUE_FULL`
//! 4. それ以外は待ち行列に積み、pump を回す
//!
//! # pump
//! `in_flight < max_concurrent` の間、先頭から取り出して dispatch する。
//! 完了したら in_flight を減らしてすぐ pump し直す（待ちがある限り空きを作らない）。
//!
//! backend の失敗は `RETRIEVAL_TIMEOUT` か `RETRIEVAL_FAILED` のどちらかに変換し、
//! それ以外のものを呼び出し側に投げない。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::config::RetrievalConfig;
use crate::domain::retrieval::{rank_entries, search_params};
use crate::domain::{ErrorCode, RequestId, RetrievalOptions, RetrievalResponse};
use crate::ports::{Clock, IdGenerator, METHOD_SEARCH, WorkerGateway};

/// Length of the rolling rate window.
pub const RATE_WINDOW_SECS: i64 = 60;

fn rate_window() -> chrono::Duration {
    chrono::Duration::seconds(RATE_WINDOW_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("more than {limit} retrievals in the last minute; try again in {retry_after_ms}ms")]
    RateLimitExceeded { limit: usize, retry_after_ms: u64 },

    #[error("too many retrievals are waiting ({max_queue_size})")]
    QueueFull { max_queue_size: usize },

    #[error("retrieval timed out: {0}")]
    Timeout(String),

    #[error("retrieval failed: {0}")]
    Failed(String),
}

impl RetrievalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RetrievalError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RetrievalError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            RetrievalError::QueueFull { .. } => ErrorCode::QueueFull,
            RetrievalError::Timeout(_) => ErrorCode::RetrievalTimeout,
            RetrievalError::Failed(_) => ErrorCode::RetrievalFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub in_flight: usize,
    pub queued: usize,
    /// Dispatches inside the rolling window.
    pub window_count: usize,
}

type Reply = Result<RetrievalResponse, RetrievalError>;

/// Handle to an admitted retrieval.
#[derive(Debug)]
pub struct RetrievalTicket {
    request_id: RequestId,
    rx: oneshot::Receiver<Reply>,
}

impl RetrievalTicket {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub async fn wait(self) -> Result<RetrievalResponse, RetrievalError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RetrievalError::Failed("the retrieval was dropped".into())))
    }
}

struct QueuedRequest {
    id: RequestId,
    query: String,
    options: RetrievalOptions,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct GatewayState {
    queue: VecDeque<QueuedRequest>,
    in_flight: usize,
    /// Dispatch timestamps, oldest first.
    window: VecDeque<DateTime<Utc>>,
}

impl GatewayState {
    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(&oldest) = self.window.front() {
            if now - oldest >= rate_window() {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

struct Inner {
    worker: Arc<dyn WorkerGateway>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: RetrievalConfig,
    state: Mutex<GatewayState>,
}

#[derive(Clone)]
pub struct RetrievalGateway {
    inner: Arc<Inner>,
}

impl RetrievalGateway {
    /// `config` is clamped to the hard ceilings.
    pub fn new(
        worker: Arc<dyn WorkerGateway>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker,
                clock,
                ids,
                config: config.clamped(),
                state: Mutex::new(GatewayState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.inner.config
    }

    /// Admit a retrieval. Returns without waiting for the backend.
    ///
    /// Must be called inside a tokio runtime.
    pub fn retrieve(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalTicket, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "query must not be empty".into(),
            ));
        }

        let inner = &self.inner;
        let now = inner.clock.now();
        let (tx, rx) = oneshot::channel();
        let id = inner.ids.generate_request_id();
        {
            let mut state = inner.lock();
            state.prune(now);

            let limit = inner.config.rate_per_minute;
            if state.window.len() + state.queue.len() >= limit {
                let retry_after_ms = state
                    .window
                    .front()
                    .map(|&oldest| (oldest + rate_window() - now).num_milliseconds().max(0) as u64)
                    .unwrap_or(0);
                tracing::warn!(limit, retry_after_ms, "retrieval rate limit exceeded");
                return Err(RetrievalError::RateLimitExceeded {
                    limit,
                    retry_after_ms,
                });
            }

            let max_queue_size = inner.config.max_queue_size;
            if state.queue.len() >= max_queue_size {
                tracing::warn!(max_queue_size, "retrieval queue full");
                return Err(RetrievalError::QueueFull { max_queue_size });
            }

            state.queue.push_back(QueuedRequest {
                id,
                query: query.to_string(),
                options,
                reply: tx,
            });
            tracing::debug!(request_id = %id, queued = state.queue.len(), "retrieval admitted");
        }

        pump(Arc::clone(inner));
        Ok(RetrievalTicket { request_id: id, rx })
    }

    /// `retrieve` + `wait`.
    pub async fn search(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalResponse, RetrievalError> {
        self.retrieve(query, options)?.wait().await
    }

    pub fn stats(&self) -> RetrievalStats {
        let now = self.inner.clock.now();
        let mut state = self.inner.lock();
        state.prune(now);
        RetrievalStats {
            in_flight: state.in_flight,
            queued: state.queue.len(),
            window_count: state.window.len(),
        }
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Dispatch queued requests while slots are free.
fn pump(inner: Arc<Inner>) {
    let ready: Vec<QueuedRequest> = {
        let now = inner.clock.now();
        let mut state = inner.lock();
        let mut ready = Vec::new();
        while state.in_flight < inner.config.max_concurrent {
            let Some(request) = state.queue.pop_front() else {
                break;
            };
            state.in_flight += 1;
            state.window.push_back(now);
            ready.push(request);
        }
        ready
    };

    for request in ready {
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let QueuedRequest {
                id,
                query,
                options,
                reply,
            } = request;

            let call = tokio::spawn(execute(Arc::clone(&inner), id, query, options));
            let result = match call.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(request_id = %id, error = %e, "retrieval task failed");
                    Err(RetrievalError::Failed("internal error".into()))
                }
            };

            inner.lock().in_flight -= 1;
            pump(Arc::clone(&inner));

            if reply.send(result).is_err() {
                tracing::debug!(request_id = %id, "retrieval caller went away");
            }
        });
    }
}

async fn execute(
    inner: Arc<Inner>,
    id: RequestId,
    query: String,
    options: RetrievalOptions,
) -> Reply {
    if !inner.worker.is_enabled() || !inner.worker.is_healthy() {
        return Err(RetrievalError::Failed(
            "the memory worker is not available".into(),
        ));
    }

    let timeout = inner.config.timeout();
    let params = search_params(id, &query, &options);
    let started = Instant::now();

    let result = match tokio::time::timeout(
        timeout,
        inner.worker.send_request(METHOD_SEARCH, params, timeout),
    )
    .await
    {
        Err(_elapsed) => {
            tracing::warn!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "retrieval timed out");
            return Err(RetrievalError::Timeout(format!(
                "no answer within {}ms",
                timeout.as_millis()
            )));
        }
        Ok(Err(e)) if e.is_timeout() => {
            tracing::warn!(request_id = %id, error_code = %e.code, "retrieval timed out in worker");
            return Err(RetrievalError::Timeout(e.message));
        }
        Ok(Err(e)) => {
            tracing::warn!(request_id = %id, error_code = %e.code, error = %e.message, "retrieval failed");
            return Err(RetrievalError::Failed(e.to_string()));
        }
        Ok(Ok(result)) => result,
    };

    let entries = rank_entries(result, &options)
        .map_err(|e| RetrievalError::Failed(format!("malformed search result: {e}")))?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(request_id = %id, entries = entries.len(), elapsed_ms, "retrieval completed");

    Ok(RetrievalResponse {
        request_id: id,
        entries,
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RetrievalError::InvalidRequest("x".into()), "INVALID_REQUEST")]
    #[case(RetrievalError::RateLimitExceeded { limit: 10, retry_after_ms: 5 }, "RATE_LIMIT_EXCEEDED")]
    #[case(RetrievalError::QueueFull { max_queue_size: 5 }, "QUEUE_FULL")]
    #[case(RetrievalError::Timeout("x".into()), "RETRIEVAL_TIMEOUT")]
    #[case(RetrievalError::Failed("x".into()), "RETRIEVAL_FAILED")]
    fn error_codes(#[case] error: RetrievalError, #[case] code: &str) {
        assert_eq!(error.code().as_str(), code);
    }

    #[test]
    fn prune_drops_only_old_entries() {
        use chrono::TimeZone;
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut state = GatewayState::default();
        state.window.push_back(t0);
        state.window.push_back(t0 + chrono::Duration::seconds(30));

        state.prune(t0 + chrono::Duration::seconds(59));
        assert_eq!(state.window.len(), 2);
        state.prune(t0 + chrono::Duration::seconds(60));
        assert_eq!(state.window.len(), 1);
    }
}
