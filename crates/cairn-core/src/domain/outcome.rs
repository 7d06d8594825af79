//! Outcome model: what a dispatch task reports back to the completion loop.
//!
//! The dispatch task never touches the ledger. It turns whatever happened
//! (gateway reply, gateway error, status artifact, cancellation) into one of
//! these and sends it over a channel.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorCode, GatewayError};
use super::ids::JobId;

/// Classification of a finished dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Completed { entity_count: u64, elapsed_ms: u64 },
    Failed { code: String, message: String },
    /// The task stopped without an answer (shutdown, abort).
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub kind: OutcomeKind,
}

impl JobOutcome {
    pub fn completed(job_id: JobId, entity_count: u64, elapsed_ms: u64) -> Self {
        Self {
            job_id,
            kind: OutcomeKind::Completed {
                entity_count,
                elapsed_ms,
            },
        }
    }

    pub fn failed(job_id: JobId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind: OutcomeKind::Failed {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn failed_with(job_id: JobId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::failed(job_id, code.as_str(), message)
    }

    /// Gateway errors keep their own code.
    pub fn from_gateway_error(job_id: JobId, error: GatewayError) -> Self {
        Self::failed(job_id, error.code, error.message)
    }

    pub fn interrupted(job_id: JobId) -> Self {
        Self {
            job_id,
            kind: OutcomeKind::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn gateway_code_is_preserved() {
        let id = JobId::from_ulid(Ulid::new());
        let o = JobOutcome::from_gateway_error(id, GatewayError::new("LLM_TIMED_OUT", "slow"));
        assert_eq!(
            o.kind,
            OutcomeKind::Failed {
                code: "LLM_TIMED_OUT".into(),
                message: "slow".into()
            }
        );
    }

    #[test]
    fn kind_serializes_with_tag() {
        let id = JobId::from_ulid(Ulid::new());
        let v = serde_json::to_value(JobOutcome::completed(id, 3, 40)).unwrap();
        assert_eq!(v["kind"]["kind"], "COMPLETED");
        assert_eq!(v["kind"]["entity_count"], 3);
    }
}
