//! FileStatusArtifactStore - `status/<job_id>.json` written by the worker side.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::atomic_io::{read_optional, remove_if_exists, write_atomic};
use crate::domain::JobId;
use crate::ports::{StatusArtifact, StatusArtifactStore, StoreError};

pub struct FileStatusArtifactStore {
    dir: PathBuf,
}

impl FileStatusArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    /// Worker-side writer. The scheduler itself never calls this.
    pub async fn write(&self, job_id: JobId, artifact: &StatusArtifact) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(artifact)?;
        write_atomic(&self.path_for(job_id), &bytes).await
    }
}

#[async_trait]
impl StatusArtifactStore for FileStatusArtifactStore {
    async fn read(&self, job_id: JobId) -> Result<Option<StatusArtifact>, StoreError> {
        let path = self.path_for(job_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let artifact = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(artifact))
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn reads_what_the_worker_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusArtifactStore::new(dir.path());
        let id = JobId::from_ulid(Ulid::new());
        assert!(store.read(id).await.unwrap().is_none());

        let artifact = StatusArtifact {
            success: false,
            error_code: Some("LLM_TIMEOUT".into()),
            error_message: Some("slow".into()),
            elapsed_ms: 900,
            entity_count: 0,
        };
        store.write(id, &artifact).await.unwrap();
        assert_eq!(store.read(id).await.unwrap(), Some(artifact));

        store.delete(id).await.unwrap();
        assert!(store.read(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn minimal_stub_parses() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusArtifactStore::new(dir.path());
        let id = JobId::from_ulid(Ulid::new());
        std::fs::write(dir.path().join(format!("{id}.json")), br#"{"success": true}"#).unwrap();

        let artifact = store.read(id).await.unwrap().unwrap();
        assert!(artifact.success);
        assert_eq!(artifact.entity_count, 0);
    }
}
