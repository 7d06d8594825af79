//! Domain model (IDs, job records, state machine, outcomes, error codes, envelopes, retrieval shapes).
//!
//! Nothing here does I/O; persistence and the worker gateway live behind `ports`.

pub mod digest;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod retrieval;
pub mod state;

pub use digest::content_digest;
pub use envelope::{CognifyReply, IngestEnvelope};
pub use errors::{ErrorCode, GatewayError, remediation_for};
pub use ids::{JobId, RequestId};
pub use job::JobRecord;
pub use outcome::{JobOutcome, OutcomeKind};
pub use retrieval::{RetrievalEntry, RetrievalOptions, RetrievalResponse};
pub use state::JobStatus;
