//! In-memory stores - 開発用・テスト用
//!
//! Same contracts as the file-backed stores, minus durability. `save`/`put`
//! can be made to fail on demand so tests can exercise the storage-error paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::{JobId, JobRecord};
use crate::ports::{
    LedgerStore, PayloadStore, StatusArtifact, StatusArtifactStore, StoreError,
};

fn injected_failure(what: &str) -> StoreError {
    StoreError::Io {
        path: format!("memory://{what}"),
        source: std::io::Error::other("injected failure"),
    }
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    jobs: Mutex<Option<Vec<JobRecord>>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing ledger (e.g. simulating a restart).
    pub fn with_jobs(jobs: Vec<JobRecord>) -> Self {
        Self {
            jobs: Mutex::new(Some(jobs)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self) -> Result<Vec<JobRecord>, StoreError> {
        let guard = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone().unwrap_or_default())
    }

    async fn save(&self, jobs: &[JobRecord]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(injected_failure("ledger"));
        }
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = Some(jobs.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cached(&self) -> Option<Vec<JobRecord>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Default)]
pub struct InMemoryPayloadStore {
    payloads: Mutex<HashMap<JobId, serde_json::Value>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, job_id: JobId, payload: &serde_json::Value) -> Result<String, StoreError> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id, payload.clone());
        Ok(format!("memory://payloads/{job_id}"))
    }

    async fn get(&self, job_id: JobId) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned())
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStatusArtifactStore {
    artifacts: Mutex<HashMap<JobId, StatusArtifact>>,
}

impl InMemoryStatusArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker-side writer.
    pub fn write(&self, job_id: JobId, artifact: StatusArtifact) {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id, artifact);
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }
}

#[async_trait]
impl StatusArtifactStore for InMemoryStatusArtifactStore {
    async fn read(&self, job_id: JobId) -> Result<Option<StatusArtifact>, StoreError> {
        Ok(self
            .artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned())
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    #[tokio::test]
    async fn ledger_save_failure_is_injectable() {
        let store = InMemoryLedgerStore::new();
        store.fail_saves(true);
        assert!(store.save(&[]).await.is_err());

        store.fail_saves(false);
        let job = JobRecord::new(JobId::from_ulid(Ulid::new()), "ds", "d", "p", Utc::now());
        store.save(std::slice::from_ref(&job)).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().await.unwrap(), vec![job]);
    }

    #[tokio::test]
    async fn payload_roundtrip() {
        let store = InMemoryPayloadStore::new();
        let id = JobId::from_ulid(Ulid::new());
        store.put(id, &serde_json::json!(1)).await.unwrap();
        assert!(store.contains(id));
        store.delete(id).await.unwrap();
        assert!(store.is_empty());
    }
}
