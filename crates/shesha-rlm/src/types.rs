//! Core types for the RLM engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use shesha_trace::{QueryStatus, Trace};

/// Sentinel answer when the loop exhausts its iteration cap.
pub const MAX_ITERATIONS_SENTINEL: &str = "[Max iterations reached without final answer]";

/// A named piece of corpus content bound into the runner's `context` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique name; the key the model uses to address this document.
    pub name: String,
    /// Full content.
    pub content: String,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Build a document from file content, with the standard banner and a
    /// per-line number gutter so the model can cite locations.
    pub fn from_file_content(path: impl AsRef<str>, content: &str) -> Self {
        let path = path.as_ref();
        let mut out = format!("=== FILE: {} ===\n", path);
        for (i, line) in content.lines().enumerate() {
            out.push_str(&format!("{:>5} | {}\n", i + 1, line));
        }
        Self {
            name: path.to_string(),
            content: out,
        }
    }

    /// Content size in characters, as shown in the document inventory.
    pub fn size(&self) -> usize {
        self.content.chars().count()
    }
}

/// The role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Aggregated token counts across all LLM calls in one query, sub-calls
/// included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Outcome of one query.
#[derive(Debug)]
pub struct QueryResult {
    /// The terminal answer, the iteration-cap sentinel, or an explanatory
    /// message for fatal errors.
    pub answer: String,
    /// Terminal status.
    pub status: QueryStatus,
    /// Full step record of the query.
    pub trace: Trace,
    /// Token totals including sub-calls.
    pub token_usage: TokenUsage,
    /// Wall-clock duration of the query.
    pub execution_time: Duration,
}
