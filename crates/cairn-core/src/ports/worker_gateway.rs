//! WorkerGateway port - the single channel to the knowledge-graph worker
//!
//! The worker is a long-lived, already-initialised process. Every write to
//! the graph goes through it, and the graph tolerates exactly one writer, so
//! there is no fallback execution path anywhere in this crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::GatewayError;

/// Method name of an ingestion request.
pub const METHOD_COGNIFY: &str = "cognify";

/// Method name of a retrieval request.
pub const METHOD_SEARCH: &str = "search";

/// Best-effort termination signal sent during shutdown.
pub const METHOD_CANCEL: &str = "cancel";

/// Request/response contract of the worker process.
///
/// The connection is owned by neither the scheduler nor the retrieval
/// gateway; both must tolerate `is_healthy()` flipping at any time.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn is_healthy(&self) -> bool;

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError>;
}
