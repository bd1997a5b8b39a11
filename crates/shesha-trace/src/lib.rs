//! shesha-trace: query tracing infrastructure.
//!
//! This crate records what happened during one RLM query and gets it safely
//! onto disk:
//!
//! - **Types**: `Trace`, `TraceStep`, `QueryContext`, `TraceSummary`
//! - **Redaction**: pattern-based secret scrubbing applied before persistence
//! - **Store**: one JSONL file per query with bounded retention
//!
//! A trace is append-only and owned by a single engine instance; redaction
//! is a pure text transform, so `trace.redacted(&redactor)` can be called
//! any number of times with the same result.

pub mod redact;
pub mod store;
pub mod types;

pub use redact::{REDACTED, RedactError, RedactionConfig, Redactor};
pub use store::{StoreConfig, TraceStore, TraceStoreError};
pub use types::{
    QueryContext, QueryStatus, StepType, TokenTotals, Trace, TraceStep, TraceSummary,
};
