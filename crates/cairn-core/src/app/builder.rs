//! SchedulerBuilder - scheduler の依存をまとめる
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 必須の依存が欠けていれば build() で止める
//!
//! 必須: ledger, payloads, artifacts, gateway
//! 任意（デフォルトあり）: notifier, probe, clock, ids

use std::sync::Arc;

use crate::impls::{SystemProcessProbe, TracingNotificationSink};
use crate::ports::{
    Clock, IdGenerator, LedgerStore, NotificationSink, PayloadStore, ProcessProbe,
    StatusArtifactStore, SystemClock, UlidGenerator, WorkerGateway,
};

/// Everything the scheduler talks to. Constructed by the composition root.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub ledger: Arc<dyn LedgerStore>,
    pub payloads: Arc<dyn PayloadStore>,
    pub artifacts: Arc<dyn StatusArtifactStore>,
    pub gateway: Arc<dyn WorkerGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    pub probe: Arc<dyn ProcessProbe>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl SchedulerDeps {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing dependencies: {0:?}. These must be provided before build().")]
    MissingDependencies(Vec<&'static str>),
}

/// # 使用例
/// ```ignore
/// let deps = SchedulerDeps::builder()
///     .ledger(Arc::new(FileLedgerStore::new(dir)))
///     .payloads(Arc::new(FilePayloadStore::new(dir.join("payloads"))))
///     .artifacts(Arc::new(FileStatusArtifactStore::new(dir.join("status"))))
///     .gateway(gateway)
///     .build()?;
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    ledger: Option<Arc<dyn LedgerStore>>,
    payloads: Option<Arc<dyn PayloadStore>>,
    artifacts: Option<Arc<dyn StatusArtifactStore>>,
    gateway: Option<Arc<dyn WorkerGateway>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    probe: Option<Arc<dyn ProcessProbe>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn payloads(mut self, payloads: Arc<dyn PayloadStore>) -> Self {
        self.payloads = Some(payloads);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn StatusArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn WorkerGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// # 検証
    /// - 必須の依存が全て揃っているかチェック
    /// - 不足があれば BuildError::MissingDependencies を返す
    pub fn build(self) -> Result<SchedulerDeps, BuildError> {
        let mut missing = Vec::new();
        if self.ledger.is_none() {
            missing.push("ledger");
        }
        if self.payloads.is_none() {
            missing.push("payloads");
        }
        if self.artifacts.is_none() {
            missing.push("artifacts");
        }
        if self.gateway.is_none() {
            missing.push("gateway");
        }

        let (Some(ledger), Some(payloads), Some(artifacts), Some(gateway)) =
            (self.ledger, self.payloads, self.artifacts, self.gateway)
        else {
            return Err(BuildError::MissingDependencies(missing));
        };

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(SchedulerDeps {
            ledger,
            payloads,
            artifacts,
            gateway,
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(TracingNotificationSink)),
            probe: self.probe.unwrap_or_else(|| Arc::new(SystemProcessProbe)),
            clock,
            ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{
        InMemoryLedgerStore, InMemoryPayloadStore, InMemoryStatusArtifactStore,
        ProcessWorkerGateway,
    };

    #[test]
    fn test_build_success_with_defaults() {
        let deps = SchedulerDeps::builder()
            .ledger(Arc::new(InMemoryLedgerStore::new()))
            .payloads(Arc::new(InMemoryPayloadStore::new()))
            .artifacts(Arc::new(InMemoryStatusArtifactStore::new()))
            .gateway(Arc::new(ProcessWorkerGateway::disabled()))
            .build();
        assert!(deps.is_ok());
    }

    #[test]
    fn test_build_missing_dependencies() {
        let deps = SchedulerDeps::builder()
            .ledger(Arc::new(InMemoryLedgerStore::new()))
            .artifacts(Arc::new(InMemoryStatusArtifactStore::new()))
            .build();
        assert!(matches!(
            deps,
            Err(BuildError::MissingDependencies(missing)) if missing == vec!["payloads", "gateway"]
        ));
    }
}
