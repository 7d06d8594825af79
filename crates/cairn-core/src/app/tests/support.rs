//! テスト用の fake 群
//!
//! - `FakeGateway`: 応答を保留 / 即答 / panic に切り替えられる worker gateway
//! - `RecordingSink`: 表示された通知を記録する
//! - `FakeProbe`: 生存 pid を外から決める
//! - `Fixture`: in-memory store と ManualClock で scheduler を組み立てる

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{oneshot, watch};

use crate::app::{IngestScheduler, NotificationConfig, SchedulerConfig, SchedulerDeps};
use crate::domain::GatewayError;
use crate::impls::{InMemoryLedgerStore, InMemoryPayloadStore, InMemoryStatusArtifactStore};
use crate::ports::{
    IdGenerator, METHOD_CANCEL, ManualClock, Notification, NotificationSink, ProcessProbe,
    Severity, UlidGenerator, WorkerGateway,
};

pub type GatewayReply = Result<serde_json::Value, GatewayError>;

#[derive(Debug, Clone)]
pub enum Mode {
    /// Park every call until `release` (or `cancel`) answers it.
    Hold,
    Reply(GatewayReply),
    Panic,
}

pub struct FakeGateway {
    enabled: AtomicBool,
    healthy: AtomicBool,
    mode: Mutex<Mode>,
    held: Mutex<HashMap<String, oneshot::Sender<GatewayReply>>>,
    calls: watch::Sender<usize>,
    cancels: AtomicUsize,
    ignore_cancel: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    methods: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeGateway {
    pub fn new(mode: Mode) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            mode: Mutex::new(mode),
            held: Mutex::new(HashMap::new()),
            calls: watch::channel(0).0,
            cancels: AtomicUsize::new(0),
            ignore_cancel: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
        }
    }

    pub fn holding() -> Self {
        Self::new(Mode::Hold)
    }

    pub fn replying(reply: GatewayReply) -> Self {
        Self::new(Mode::Reply(reply))
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Count `cancel` calls but leave the parked call waiting.
    pub fn ignore_cancel(&self) {
        self.ignore_cancel.store(true, Ordering::SeqCst);
    }

    /// Answer a parked call. `key` is the job id or request id.
    pub fn release(&self, key: &str, reply: GatewayReply) -> bool {
        match self.held.lock().unwrap().remove(key) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn held_keys(&self) -> Vec<String> {
        self.held.lock().unwrap().keys().cloned().collect()
    }

    /// Calls other than `cancel`.
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    pub async fn wait_calls(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.calls.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|c| *c >= n)).await,
            Ok(Ok(_))
        )
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `(method, params)` of every non-cancel call, in arrival order.
    pub fn requests(&self) -> Vec<(String, serde_json::Value)> {
        self.methods.lock().unwrap().clone()
    }
}

fn request_key(params: &serde_json::Value) -> String {
    params
        .get("job_id")
        .or_else(|| params.get("request_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerGateway for FakeGateway {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError> {
        let key = request_key(&params);
        if method == METHOD_CANCEL {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.ignore_cancel.load(Ordering::SeqCst) {
                return Ok(serde_json::json!({}));
            }
            self.release(
                &key,
                Err(GatewayError::new("CANCELLED", "cancelled by the scheduler")),
            );
            return Ok(serde_json::json!({}));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);
        self.methods
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        let mode = self.mode.lock().unwrap().clone();
        let parked = match mode {
            Mode::Reply(reply) => {
                self.calls.send_modify(|c| *c += 1);
                return reply;
            }
            Mode::Panic => {
                self.calls.send_modify(|c| *c += 1);
                panic!("fake gateway panic");
            }
            Mode::Hold => {
                let (tx, rx) = oneshot::channel();
                self.held.lock().unwrap().insert(key, tx);
                rx
            }
        };
        self.calls.send_modify(|c| *c += 1);
        parked
            .await
            .unwrap_or_else(|_| Err(GatewayError::unavailable("fake gateway dropped the call")))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| n.severity == severity)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: Notification) {
        self.shown.lock().unwrap().push(notification);
    }
}

pub const OWN_PID: u32 = 4242;

#[derive(Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    pub fn set_alive(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn current_pid(&self) -> u32 {
        OWN_PID
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid == OWN_PID || self.alive.lock().unwrap().contains(&pid)
    }
}

pub fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
}

/// Shared handles around one scheduler instance.
pub struct Fixture {
    pub config: SchedulerConfig,
    pub notifications: NotificationConfig,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub payloads: Arc<InMemoryPayloadStore>,
    pub artifacts: Arc<InMemoryStatusArtifactStore>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
    pub probe: Arc<FakeProbe>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new(gateway: FakeGateway) -> Self {
        Self::with_ledger(gateway, InMemoryLedgerStore::new())
    }

    pub fn with_ledger(gateway: FakeGateway, ledger: InMemoryLedgerStore) -> Self {
        Self {
            config: SchedulerConfig {
                shutdown_grace_ms: 500,
                status_poll_interval_ms: 10,
                ..SchedulerConfig::default()
            },
            notifications: NotificationConfig::default(),
            ledger: Arc::new(ledger),
            payloads: Arc::new(InMemoryPayloadStore::new()),
            artifacts: Arc::new(InMemoryStatusArtifactStore::new()),
            gateway: Arc::new(gateway),
            sink: Arc::new(RecordingSink::default()),
            probe: Arc::new(FakeProbe::default()),
            clock: Arc::new(ManualClock::new(epoch())),
        }
    }

    pub fn ids(&self) -> Arc<dyn IdGenerator> {
        Arc::new(UlidGenerator::new(Arc::clone(&self.clock)))
    }

    pub async fn start(&self) -> IngestScheduler {
        let deps = SchedulerDeps::builder()
            .ledger(self.ledger.clone())
            .payloads(self.payloads.clone())
            .artifacts(self.artifacts.clone())
            .gateway(self.gateway.clone())
            .notifier(self.sink.clone())
            .probe(self.probe.clone())
            .clock(self.clock.clone())
            .ids(self.ids())
            .build()
            .unwrap();
        IngestScheduler::start(deps, self.config.clone(), self.notifications.clone())
            .await
            .unwrap()
    }
}

pub fn summary(text: &str) -> serde_json::Value {
    serde_json::json!({ "summary": text })
}

pub fn entities(n: u64) -> GatewayReply {
    Ok(serde_json::json!({ "entity_count": n }))
}

pub const SETTLE: Duration = Duration::from_secs(2);
