//! Frame types for the controller ↔ runner stream.
//!
//! Each frame is one JSON object on its own line. Controller frames are
//! tagged by `action`, runner frames by `type`. Readers ignore unknown
//! fields; a missing required field fails deserialization and surfaces as
//! a protocol error at the transport layer.

use serde::{Deserialize, Serialize};

/// A document handed to the runner at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    /// Unique document name (key in the runner's `context` map).
    pub name: String,
    /// Full document content.
    pub content: String,
}

impl DocumentPayload {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Frames sent from the controller to the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControllerFrame {
    /// Load documents into the runner's read-only `context` map.
    /// Sent exactly once, before any `execute`.
    Init { documents: Vec<DocumentPayload> },

    /// Evaluate `code` in the persistent REPL namespace.
    Execute { code: String },

    /// Answer to a pending `llm_query` from the runner.
    LlmResponse {
        content: String,
        tokens_used: Option<u64>,
    },

    /// Ask the runner to exit cleanly.
    Shutdown,
}

/// Frames sent from the runner to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerFrame {
    /// Outcome of one `execute` call.
    Result(ExecutionResult),

    /// The evaluated code called `llm_query`; the runner is now blocked
    /// awaiting a matching `llm_response`.
    LlmQuery { instruction: String, content: String },
}

/// Result of evaluating one `execute` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured print output.
    pub stdout: String,
    /// Captured diagnostics output.
    pub stderr: String,
    /// Value of the trailing expression statement, if any.
    pub return_value: serde_json::Value,
    /// Set when the code invoked `FINAL(value)`.
    pub final_answer: Option<String>,
    /// Set when evaluation raised; holds the error message.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// An empty, successful result.
    pub fn empty() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            return_value: serde_json::Value::Null,
            final_answer: None,
            error: None,
        }
    }

    /// A result carrying only an error message.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::empty()
        }
    }

    /// True when nothing observable was produced.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty()
            && self.stderr.is_empty()
            && self.return_value.is_null()
            && self.final_answer.is_none()
            && self.error.is_none()
    }
}
