//! Error types for the RLM engine.
//!
//! Fatal outcomes of a query are folded into the `QueryResult` rather than
//! raised; the variants here surface through constructors, the pool, and
//! the LLM client. Code evaluation failures are not errors at this level;
//! they travel in-band inside an `ExecutionResult` and the loop continues.

use thiserror::Error;

/// Result type alias for RLM operations.
pub type Result<T> = std::result::Result<T, RlmError>;

/// Errors that can occur in the RLM engine and its collaborators.
#[derive(Debug, Error)]
pub enum RlmError {
    /// Transport or provider error from the LLM client.
    #[error("LLM error: {0}")]
    Llm(String),

    /// The runner violated framing, size, or timing limits.
    #[error("protocol error: {0}")]
    Protocol(#[from] shesha_protocol::ProtocolError),

    /// The overall query deadline elapsed.
    #[error("query timed out after {seconds} seconds")]
    QueryTimeout { seconds: u64 },

    /// No runner could be provided within policy.
    #[error("runner pool exhausted: {0}")]
    PoolExhausted(String),

    /// A runner process could not be started.
    #[error("failed to spawn runner: {0}")]
    RunnerSpawn(String),

    /// Invalid configuration; the only kind allowed to escape `query()`.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for RlmError {
    fn from(e: reqwest::Error) -> Self {
        RlmError::Llm(e.to_string())
    }
}

impl From<std::io::Error> for RlmError {
    fn from(e: std::io::Error) -> Self {
        RlmError::Internal(e.to_string())
    }
}
