//! LLM client abstraction.
//!
//! The engine talks to a chat-completion provider through the `LlmClient`
//! trait: one call in, content plus token counts out. `MockClient` returns
//! scripted completions in order and records every request, which is how
//! the engine and the end-to-end scenarios are tested without a provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, RlmError};
use crate::types::ChatMessage;

/// One completion returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Assistant reply text.
    pub content: String,
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated.
    pub completion_tokens: u64,
}

impl Completion {
    pub fn new(content: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            content: content.into(),
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Trait for chat-completion providers.
///
/// Implementations must be safe to call concurrently; the engine shares
/// one client between the main loop and sub-calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Execute one completion over the given conversation.
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> Result<Completion>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}

/// A client that can be shared across tasks.
pub type SharedClient = Arc<dyn LlmClient>;

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures). Non-retryable
/// errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    provider: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_error = Some(e);
                if attempt < max_retries {
                    tracing::warn!(
                        provider,
                        attempt = attempt + 1,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt"))
}

/// Only transport-level failures are worth retrying.
pub fn is_retryable(error: &RlmError) -> bool {
    matches!(error, RlmError::Llm(_))
}

/// A mock client for testing.
///
/// Completions are returned in order; requesting more than were queued is
/// an error. Every request's messages are captured for assertions.
#[derive(Debug)]
pub struct MockClient {
    name: String,
    completions: std::sync::Mutex<Vec<Completion>>,
    request_log: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockClient {
    /// Create a mock that replays `completions` in order.
    pub fn new(completions: Vec<Completion>) -> Self {
        Self {
            name: "mock".to_string(),
            completions: std::sync::Mutex::new(completions),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A mock with a single text reply.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![Completion::new(text, 10, 20)])
    }

    /// All requests made so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.request_log.lock().unwrap().clone()
    }

    /// Number of requests made so far.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn complete(&self, messages: &[ChatMessage], _model: &str) -> Result<Completion> {
        self.request_log.lock().unwrap().push(messages.to_vec());

        let mut completions = self.completions.lock().unwrap();
        if completions.is_empty() {
            return Err(RlmError::Llm(
                "MockClient: no more completions available".to_string(),
            ));
        }
        Ok(completions.remove(0))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A client that always fails; used to exercise error paths.
#[derive(Debug, Default)]
pub struct FailingClient;

#[async_trait]
impl LlmClient for FailingClient {
    async fn complete(&self, _messages: &[ChatMessage], _model: &str) -> Result<Completion> {
        Err(RlmError::Llm("provider unavailable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
