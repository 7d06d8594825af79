//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。scheduler と retrieval gateway は
//! ここにある trait にだけ依存し、実装（ファイル、子プロセス、editor UI）は
//! `impls` かバイナリ側で差し込む。

pub mod artifact_store;
pub mod clock;
pub mod id_generator;
pub mod ledger_store;
pub mod notifier;
pub mod payload_store;
pub mod process_probe;
pub mod worker_gateway;

// 主要な trait を再エクスポート
pub use self::artifact_store::{StatusArtifact, StatusArtifactStore};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::ledger_store::{LedgerStore, StoreError};
pub use self::notifier::{Notification, NotificationAction, NotificationSink, Severity};
pub use self::payload_store::PayloadStore;
pub use self::process_probe::ProcessProbe;
pub use self::worker_gateway::{METHOD_CANCEL, METHOD_COGNIFY, METHOD_SEARCH, WorkerGateway};
