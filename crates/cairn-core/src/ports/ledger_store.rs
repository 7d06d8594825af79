//! LedgerStore port - durable record of every known job
//!
//! # 設計原則
//! - 書き込みは常に全体（temp file + rename）。部分的な ledger は存在しない
//! - 直近の内容はメモリにもミラーし、ファイルを読まずに参照できる

use async_trait::async_trait;

use crate::domain::JobRecord;

/// Persistence error shared by the ledger, payload and status-artifact stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data in {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load every persisted job. A missing ledger is an empty ledger.
    async fn load(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Replace the whole ledger atomically.
    async fn save(&self, jobs: &[JobRecord]) -> Result<(), StoreError>;

    /// In-memory mirror of the last successful load/save.
    fn cached(&self) -> Option<Vec<JobRecord>>;
}
