//! PayloadStore port - per-job copy of the original ingestion payload
//!
//! The payload outlives crashes so a retry can resend exactly what the caller
//! submitted. It is deleted only when its job completes successfully.

use async_trait::async_trait;

use super::StoreError;
use crate::domain::JobId;

#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist the payload; returns the reference stored on the job.
    async fn put(&self, job_id: JobId, payload: &serde_json::Value) -> Result<String, StoreError>;

    /// `Ok(None)` when the payload is gone.
    async fn get(&self, job_id: JobId) -> Result<Option<serde_json::Value>, StoreError>;

    /// Deleting a missing payload is not an error.
    async fn delete(&self, job_id: JobId) -> Result<(), StoreError>;
}
