//! StatusArtifactStore port - completion stubs written by the worker side
//!
//! When a `cognify` call is detached, the worker reports completion only by
//! writing one small status file per job. The scheduler polls for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::domain::JobId;

/// Completion stub (`success`, `error_code`, `error_message`, `elapsed_ms`, `entity_count`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusArtifact {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub entity_count: u64,
}

#[async_trait]
pub trait StatusArtifactStore: Send + Sync {
    async fn read(&self, job_id: JobId) -> Result<Option<StatusArtifact>, StoreError>;

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError>;
}
