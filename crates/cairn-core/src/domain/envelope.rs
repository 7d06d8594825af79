//! IngestEnvelope - everything the worker needs to ingest one summary.

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Params of the `cognify` request.
///
/// The payload is opaque to the scheduler: it is persisted and forwarded
/// verbatim, so a retry sends exactly what the caller originally submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub job_id: JobId,
    pub dataset_key: String,
    pub content_digest: String,
    pub payload: serde_json::Value,
}

impl IngestEnvelope {
    pub fn new(
        job_id: JobId,
        dataset_key: impl Into<String>,
        content_digest: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            dataset_key: dataset_key.into(),
            content_digest: content_digest.into(),
            payload,
        }
    }

    /// Request params for the worker gateway.
    pub fn to_params(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id,
            "dataset_key": self.dataset_key,
            "content_digest": self.content_digest,
            "payload": self.payload,
        })
    }
}

/// What the worker said about a `cognify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CognifyReply {
    /// Finished in-band.
    Completed { entity_count: u64 },

    /// Accepted; completion arrives through the status artifact.
    Detached,
}

impl CognifyReply {
    /// `{"entity_count": n}` or `{"detached": true}`. Anything else counts
    /// as an in-band success with zero entities.
    pub fn from_result(result: &serde_json::Value) -> Self {
        if result.get("detached").and_then(|v| v.as_bool()) == Some(true) {
            return CognifyReply::Detached;
        }
        let entity_count = result
            .get("entity_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        CognifyReply::Completed { entity_count }
    }
}
