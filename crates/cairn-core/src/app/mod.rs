//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: scheduler の依存の組み立て（Fail-fast）
//! - **IngestScheduler**: ingestion job の受け付け・dispatch・完了処理
//! - **RetrievalGateway**: retrieval の同時実行数・レート制御
//! - **NotificationPolicy**: 成功通知の間引き
//! - **reconcile**: 起動時の照合と retention による回収
//! - **poller**: status artifact のポーリング
//! - **CairnConfig**: 設定

pub mod builder;
pub mod config;
pub mod notify_policy;
pub mod poller;
pub mod reconcile;
pub mod retrieval_gateway;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod tests;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SchedulerBuilder, SchedulerDeps};
pub use self::config::{
    CairnConfig, ConfigError, NotificationConfig, RetrievalConfig, SchedulerConfig, StorageConfig,
    WorkerConfig,
};
pub use self::notify_policy::NotificationPolicy;
pub use self::retrieval_gateway::{RetrievalError, RetrievalGateway, RetrievalStats, RetrievalTicket};
pub use self::scheduler::{AdmissionError, IngestScheduler, SchedulerError, SubmitReceipt};
pub use self::status::SchedulerStatus;
