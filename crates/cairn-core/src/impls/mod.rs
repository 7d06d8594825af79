//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileLedgerStore / FilePayloadStore / FileStatusArtifactStore**: workspace 配下のファイル（本番用）
//! - **InMemory\***: テスト用
//! - **ProcessWorkerGateway**: 子プロセスとして動く worker への NDJSON クライアント
//! - **SystemProcessProbe**: pid の生存確認
//! - **TracingNotificationSink**: headless 実行用の通知先

pub(crate) mod atomic_io;
pub mod fs_ledger;
pub mod fs_payload;
pub mod fs_status;
pub mod inmem_store;
pub mod notifier;
pub mod process_gateway;
pub mod process_probe;

// 主要な型を再エクスポート
pub use self::fs_ledger::{FileLedgerStore, LEDGER_FILE};
pub use self::fs_payload::FilePayloadStore;
pub use self::fs_status::FileStatusArtifactStore;
pub use self::inmem_store::{InMemoryLedgerStore, InMemoryPayloadStore, InMemoryStatusArtifactStore};
pub use self::notifier::TracingNotificationSink;
pub use self::process_gateway::{ProcessWorkerGateway, WorkerCommand};
pub use self::process_probe::SystemProcessProbe;
