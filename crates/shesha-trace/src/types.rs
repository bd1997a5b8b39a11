//! Trace data types.
//!
//! A `Trace` is the append-only record of one query: every generated code
//! block, every observation fed back to the model, every sub-call round
//! trip, and the terminal answer or error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cap on a single step's content, in bytes.
pub const DEFAULT_STEP_CONTENT_LIMIT: usize = 64 * 1024;

/// Marker appended when step content is clipped.
pub const TRUNCATION_MARKER: &str = " …[truncated]";

/// What a trace step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// The model produced a REPL code block.
    CodeGenerated,
    /// The wrapped observation fed back after an execute.
    CodeOutput,
    /// The sandbox asked for a sub-LLM call.
    SubcallRequest,
    /// The sub-LLM call's reply.
    SubcallResponse,
    /// A recoverable or fatal error surfaced during the iteration.
    Error,
    /// The terminal answer.
    FinalAnswer,
}

/// One record in a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Step kind.
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Zero-based main-loop iteration this step belongs to.
    pub iteration: u32,

    /// Wall-clock time the step was recorded (sub-second resolution).
    pub timestamp: DateTime<Utc>,

    /// Step payload, possibly clipped to the trace's content limit.
    pub content: String,

    /// Tokens attributed to this step, when it corresponds to an LLM call.
    pub tokens_used: Option<u64>,

    /// Duration of the operation this step records, when measured.
    pub duration_ms: Option<u64>,
}

/// Append-only record of one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique identifier (v4 UUID) for this query.
    pub trace_id: String,

    /// When the query started.
    pub started_at: DateTime<Utc>,

    /// Ordered steps.
    pub steps: Vec<TraceStep>,

    #[serde(skip, default = "default_content_limit")]
    content_limit: usize,
}

fn default_content_limit() -> usize {
    DEFAULT_STEP_CONTENT_LIMIT
}

impl Trace {
    /// Create a trace with the given id.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            started_at: Utc::now(),
            steps: Vec::new(),
            content_limit: DEFAULT_STEP_CONTENT_LIMIT,
        }
    }

    /// Create a trace with a fresh random id.
    pub fn new_random() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Override the per-step content cap.
    pub fn with_content_limit(mut self, bytes: usize) -> Self {
        self.content_limit = bytes;
        self
    }

    /// Append a step without token or timing attribution.
    pub fn append(&mut self, step_type: StepType, iteration: u32, content: impl Into<String>) {
        self.append_full(step_type, iteration, content, None, None);
    }

    /// Append a fully attributed step.
    ///
    /// Iteration numbers must be monotonically non-decreasing; content is
    /// clipped to the configured limit with an explicit marker.
    pub fn append_full(
        &mut self,
        step_type: StepType,
        iteration: u32,
        content: impl Into<String>,
        tokens_used: Option<u64>,
        duration_ms: Option<u64>,
    ) {
        debug_assert!(
            self.steps.last().is_none_or(|s| s.iteration <= iteration),
            "trace iterations must be non-decreasing"
        );
        self.steps.push(TraceStep {
            step_type,
            iteration,
            timestamp: Utc::now(),
            content: clip(content.into(), self.content_limit),
            tokens_used,
            duration_ms,
        });
    }

    /// The terminal step, if the trace is closed.
    pub fn terminal_step(&self) -> Option<&TraceStep> {
        self.steps
            .last()
            .filter(|s| matches!(s.step_type, StepType::FinalAnswer | StepType::Error))
    }

    /// Sum of `tokens_used` across steps that carry it.
    pub fn tokens_recorded(&self) -> u64 {
        self.steps.iter().filter_map(|s| s.tokens_used).sum()
    }

    /// Number of distinct iterations recorded.
    pub fn iteration_count(&self) -> u32 {
        self.steps.last().map(|s| s.iteration + 1).unwrap_or(0)
    }

    /// A copy with every step's content passed through `redactor`.
    pub fn redacted(&self, redactor: &crate::redact::Redactor) -> Trace {
        let mut out = self.clone();
        for step in &mut out.steps {
            step.content = redactor.redact(&step.content);
        }
        out
    }
}

/// Terminal status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// A final answer was produced.
    Success,
    /// The loop exhausted its iteration cap without a final answer.
    MaxIterations,
    /// A fatal error ended the query.
    Error,
}

/// Metadata identifying a query, persisted as the trace header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub trace_id: String,
    pub question: String,
    pub document_ids: Vec<String>,
    pub model: String,
    pub system_prompt: String,
    pub subcall_prompt_template: String,
}

impl QueryContext {
    /// A copy with the free-text fields passed through `redactor`.
    pub fn redacted(&self, redactor: &crate::redact::Redactor) -> QueryContext {
        QueryContext {
            question: redactor.redact(&self.question),
            system_prompt: redactor.redact(&self.system_prompt),
            ..self.clone()
        }
    }
}

/// Aggregate token counts for the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

/// Closing record of a persisted trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub answer: String,
    pub total_iterations: u32,
    pub total_tokens: TokenTotals,
    pub total_duration_ms: u64,
    pub status: QueryStatus,
}

/// Clip `text` to at most `limit` bytes on a char boundary.
fn clip(text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut clipped = text[..end].to_string();
    clipped.push_str(TRUNCATION_MARKER);
    clipped
}
