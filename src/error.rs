//! Failure taxonomy of a classification run.
//!
//! Chunk-local recoverable conditions (out-of-range or missing indices,
//! near-duplicate domain names) never become errors; they are fixed by the
//! validator and post-processor. Everything here either gets retried by the
//! reliability layer or propagates to the caller.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    /// Nothing to classify, or a malformed request on our side.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network failure or provider-side 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Provider responded with HTTP 429 or a quota signal.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be parsed into a taxonomy.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Output hit the provider's size limit. Retrying at the same chunk size
    /// cannot succeed.
    #[error("provider output truncated after {candidates_tokens} tokens; reduce chunk size")]
    Truncated { candidates_tokens: u64 },

    #[error("content blocked by provider policy: {0}")]
    ContentBlocked(String),

    /// Request rejected by the provider as unprocessable (non-429 4xx).
    #[error("provider rejected request: {0}")]
    InvalidRequest(String),

    /// Circuit breaker for the phase is open; no call was attempted.
    #[error("{phase} service unavailable: circuit open")]
    ServiceUnavailable { phase: &'static str },

    #[error("{attempts} attempts exhausted, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ClassifyError>,
    },

    #[error("classification cancelled")]
    Cancelled,

    /// Checkpoint store failure.
    #[error("progress store error: {0}")]
    Store(String),
}

impl ClassifyError {
    /// Whether the reliability layer may retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassifyError::Transient(_)
                | ClassifyError::RateLimited(_)
                | ClassifyError::Timeout(_)
                | ClassifyError::MalformedResponse(_)
        )
    }

    /// Errors that a rerun with the same input and config will hit again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.root(),
            ClassifyError::InvalidInput(_)
                | ClassifyError::Truncated { .. }
                | ClassifyError::ContentBlocked(_)
                | ClassifyError::InvalidRequest(_)
        )
    }

    /// Innermost error, unwrapping [`ClassifyError::RetriesExhausted`].
    pub fn root(&self) -> &ClassifyError {
        match self {
            ClassifyError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Short, caller-facing advice on what to do next.
    pub fn action_hint(&self) -> &'static str {
        match self.root() {
            ClassifyError::InvalidInput(_) => "fix the input; retrying will not help",
            ClassifyError::Truncated { .. } => "reduce chunk size and retry",
            ClassifyError::ContentBlocked(_) => "skip or flag the analysis; content was blocked",
            ClassifyError::InvalidRequest(_) => "check provider configuration",
            ClassifyError::Cancelled => "run was cancelled; a retry resumes from the checkpoint",
            ClassifyError::Store(_) => "check the progress store",
            _ => "retry later; completed chunks resume from the checkpoint",
        }
    }
}

/// A run-level failure carrying enough context to decide on resumption.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("classification failed at chunk {failed_chunk} of {total_chunks}: {source}")]
pub struct PipelineFailure {
    #[source]
    pub source: ClassifyError,
    /// Chunks whose outputs are safe in the checkpoint.
    pub completed_chunks: usize,
    pub failed_chunk: usize,
    pub total_chunks: usize,
    /// True when a checkpoint was written before this failure propagated.
    pub checkpointed: bool,
}

impl PipelineFailure {
    pub fn new(source: ClassifyError) -> Self {
        Self {
            source,
            completed_chunks: 0,
            failed_chunk: 0,
            total_chunks: 0,
            checkpointed: false,
        }
    }
}

impl From<ClassifyError> for PipelineFailure {
    fn from(source: ClassifyError) -> Self {
        Self::new(source)
    }
}
