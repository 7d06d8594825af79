//! FilePayloadStore - `payloads/<job_id>.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::atomic_io::{read_optional, remove_if_exists, write_atomic};
use crate::domain::JobId;
use crate::ports::{PayloadStore, StoreError};

pub struct FilePayloadStore {
    dir: PathBuf,
}

impl FilePayloadStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl PayloadStore for FilePayloadStore {
    async fn put(&self, job_id: JobId, payload: &serde_json::Value) -> Result<String, StoreError> {
        let path = self.path_for(job_id);
        let bytes = serde_json::to_vec(payload)?;
        write_atomic(&path, &bytes).await?;
        Ok(path.display().to_string())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.path_for(job_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let payload = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(payload))
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(job_id)).await
    }
}
