//! FileLedgerStore - JSON array ledger, one per workspace.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use super::atomic_io::{read_optional, write_atomic};
use crate::domain::JobRecord;
use crate::ports::{LedgerStore, StoreError};

/// Ledger file name inside the workspace storage directory.
pub const LEDGER_FILE: &str = "ledger.json";

/// Ledger persisted as `<dir>/ledger.json`, mirrored in memory.
pub struct FileLedgerStore {
    path: PathBuf,
    mirror: RwLock<Option<Vec<JobRecord>>>,
}

impl FileLedgerStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(LEDGER_FILE),
            mirror: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn set_mirror(&self, jobs: Vec<JobRecord>) {
        *self.mirror.write().unwrap_or_else(|e| e.into_inner()) = Some(jobs);
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = match read_optional(&self.path).await? {
            None => Vec::new(),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                    path: self.path.display().to_string(),
                    source,
                })?
            }
        };
        self.set_mirror(jobs.clone());
        Ok(jobs)
    }

    async fn save(&self, jobs: &[JobRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(jobs)?;
        write_atomic(&self.path, &bytes).await?;
        self.set_mirror(jobs.to_vec());
        tracing::trace!(path = %self.path.display(), jobs = jobs.len(), "ledger persisted");
        Ok(())
    }

    fn cached(&self) -> Option<Vec<JobRecord>> {
        self.mirror
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
