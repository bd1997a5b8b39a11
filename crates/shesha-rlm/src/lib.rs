//! shesha-rlm: the Recursive Language Model engine.
//!
//! This crate ties the runtime together:
//! - LLM client abstraction with an OpenAI-compatible implementation
//! - Warm pool of single-use sandboxed runners
//! - Host-side executor adapter for the framed sandbox protocol,
//!   including recursive `llm_query` sub-calls
//! - Prompt assembly with an explicit untrusted-content trust boundary
//! - The iteration loop: prompt → code → execute → observe → repeat

pub mod client;
pub mod engine;
pub mod error;
pub mod executor;
pub mod openai;
pub mod pool;
pub mod prompt;
pub mod types;

pub use client::{
    Completion, FailingClient, LlmClient, MockClient, SharedClient, is_retryable, with_retry,
};
pub use engine::{EngineConfig, RlmEngine};
pub use error::{Result, RlmError};
pub use executor::{DEFAULT_MAX_SUBCALL_CHARS, ExecOutcome, ExecutorAdapter};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use pool::{
    PoolConfig, ProcessRunnerFactory, ReleaseOutcome, RunnerConnection, RunnerFactory,
    RunnerHandle, RunnerPool, RunnerProc,
};
pub use prompt::{
    DEFAULT_FENCE_TAG, PromptSet, UNTRUSTED_BEGIN, UNTRUSTED_END, wrap_repl_output,
    wrap_untrusted,
};
pub use types::{
    ChatMessage, ChatRole, Document, MAX_ITERATIONS_SENTINEL, QueryResult, TokenUsage,
};
