use thiserror::Error;

use crate::llm_client::LlmError;
use crate::store::StoreError;

/// Pipeline-level error type. Per-record failures are caught at the record
/// boundary and recorded on the record itself; these variants are the ones
/// that abort a run (or a single-record intake).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candidate profile error: {0}")]
    Candidate(String),

    #[error(transparent)]
    Engine(#[from] crate::scoring::engine::EngineFailure),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
