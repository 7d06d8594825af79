//! ProcessWorkerGateway - the worker as a long-lived child process
//!
//! # Protocol
//! One JSON object per line in both directions:
//! - request:  `{"id": 7, "method": "cognify", "params": {...}}`
//! - response: `{"id": 7, "result": {...}}` or `{"id": 7, "error": {"code": "...", "message": "..."}}`
//!
//! Responses may arrive in any order; they are matched to callers by `id`.
//! Once the child's stdout closes, every pending and future call fails with
//! `GATEWAY_UNAVAILABLE` and `is_healthy()` reports `false`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use crate::domain::GatewayError;
use crate::ports::WorkerGateway;

type Reply = Result<serde_json::Value, GatewayError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// How to launch the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: u64,
    method: &'a str,
    params: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ResponseFrame {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<GatewayError>,
}

pub struct ProcessWorkerGateway {
    enabled: bool,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: PendingMap,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ProcessWorkerGateway {
    /// A gateway that reports itself disabled and never spawns anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            alive: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the worker and start the response reader.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(command: &WorkerCommand) -> Result<Self, GatewayError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::unavailable(format!("failed to spawn '{}': {e}", command.program))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::unavailable("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::unavailable("worker stdout was not captured"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(read_responses(stdout, Arc::clone(&pending), Arc::clone(&alive)));

        tracing::info!(program = %command.program, pid = ?child.id(), "worker process started");

        Ok(Self {
            enabled: true,
            alive,
            next_id: AtomicU64::new(1),
            pending,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
        })
    }

    /// Stop the worker process.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take()
            && let Err(e) = child.kill().await
        {
            tracing::warn!(error = %e, "failed to kill worker process");
        }
        fail_all_pending(&self.pending, "worker process was stopped");
    }

    /// Insert a reply slot for a new request id.
    ///
    /// The reader clears `alive` before draining `pending`, so a slot inserted
    /// after that drain is caught by the second `alive` check.
    fn register_pending(&self) -> Result<(u64, oneshot::Receiver<Reply>), GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if !self.alive.load(Ordering::SeqCst) {
            self.take_pending(id);
            return Err(GatewayError::unavailable("worker process is not running"));
        }
        Ok((id, rx))
    }

    fn take_pending(&self, id: u64) -> Option<oneshot::Sender<Reply>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }
}

#[async_trait]
impl WorkerGateway for ProcessWorkerGateway {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_healthy(&self) -> bool {
        self.enabled && self.alive.load(Ordering::SeqCst)
    }

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError> {
        if !self.is_healthy() {
            return Err(GatewayError::unavailable("worker process is not running"));
        }

        let (id, rx) = self.register_pending()?;

        let mut line = serde_json::to_vec(&RequestFrame {
            id,
            method,
            params: &params,
        })
        .map_err(|e| {
            self.take_pending(id);
            GatewayError::new("INVALID_REQUEST", e.to_string())
        })?;
        line.push(b'\n');

        let write_result = {
            let mut stdin = self.stdin.lock().await;
            match stdin.as_mut() {
                Some(stdin) => match stdin.write_all(&line).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                },
                None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
            }
        };
        if let Err(e) = write_result {
            self.take_pending(id);
            self.alive.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, method, "failed to write to worker process");
            return Err(GatewayError::unavailable(format!(
                "failed to write to worker process: {e}"
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_closed)) => Err(GatewayError::unavailable(
                "worker process closed before responding",
            )),
            Err(_elapsed) => {
                self.take_pending(id);
                Err(GatewayError::timeout(format!(
                    "{method} did not complete within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

async fn read_responses(stdout: ChildStdout, pending: PendingMap, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let frame: ResponseFrame = match serde_json::from_str(trimmed) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed worker frame");
                        continue;
                    }
                };
                let sender = pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&frame.id);
                let Some(sender) = sender else {
                    // caller already timed out
                    tracing::debug!(id = frame.id, "late worker response dropped");
                    continue;
                };
                let reply = match frame.error {
                    Some(error) => Err(error),
                    None => Ok(frame.result.unwrap_or(serde_json::Value::Null)),
                };
                let _ = sender.send(reply);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read from worker process");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    tracing::warn!("worker process output closed");
    fail_all_pending(&pending, "worker process exited");
}

fn fail_all_pending(pending: &PendingMap, message: &str) {
    let drained: Vec<_> = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain()
        .collect();
    for (_, sender) in drained {
        let _ = sender.send(Err(GatewayError::unavailable(message)));
    }
}
