//! JSONL trace persistence.
//!
//! One file per query, three record shapes in order:
//!
//! 1. a `type=header` line carrying the [`QueryContext`]
//! 2. one line per [`TraceStep`] (the step's own `type` field tags it)
//! 3. a `type=summary` line with totals and the terminal status
//!
//! Filenames are `<ISO-timestamp>_<short-id>.jsonl` with `-` substituted
//! for `:` so they sort chronologically and stay filesystem-safe. Retention
//! keeps the newest `max_traces` files by that sort order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{QueryContext, Trace, TraceStep, TraceSummary};

/// Default retention: traces kept per project.
pub const DEFAULT_MAX_TRACES: usize = 50;

/// Error type for trace persistence.
///
/// Callers are expected to log and swallow these: a failed trace write
/// never affects the query result it describes.
#[derive(Debug, thiserror::Error)]
pub enum TraceStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not a trace file: {0}")]
    BadFile(String),
}

/// Configuration for the trace store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one JSONL file per query.
    pub dir: PathBuf,

    /// Maximum trace files kept; oldest beyond this are deleted.
    pub max_traces: usize,

    /// Whether persistence is enabled at all.
    pub enabled: bool,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_traces: DEFAULT_MAX_TRACES,
            enabled: true,
        }
    }

    pub fn with_max_traces(mut self, max: usize) -> Self {
        self.max_traces = max;
        self
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            max_traces: 0,
            enabled: false,
        }
    }
}

/// Header record: first line of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderRecord {
    #[serde(rename = "type")]
    record_type: String,
    started_at: DateTime<Utc>,
    #[serde(flatten)]
    context: QueryContext,
}

/// Summary record: last line of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryRecord {
    #[serde(rename = "type")]
    record_type: String,
    #[serde(flatten)]
    summary: TraceSummary,
}

/// A fully re-parsed trace file.
#[derive(Debug, Clone)]
pub struct StoredTrace {
    pub context: QueryContext,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<TraceStep>,
    pub summary: TraceSummary,
}

/// Writes traces as one JSONL file per query, with bounded retention.
pub struct TraceStore {
    config: StoreConfig,
}

impl TraceStore {
    /// Create a store, ensuring the trace directory exists.
    pub fn new(config: StoreConfig) -> Result<Self, TraceStoreError> {
        if config.enabled {
            fs::create_dir_all(&config.dir)?;
        }
        Ok(Self { config })
    }

    /// Persist one query's trace. Returns the written path.
    ///
    /// The caller is responsible for redacting `trace` and `context` first;
    /// the store writes exactly what it is given.
    pub fn write(
        &self,
        trace: &Trace,
        context: &QueryContext,
        summary: &TraceSummary,
    ) -> Result<Option<PathBuf>, TraceStoreError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let path = self.config.dir.join(Self::file_name(trace));
        let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
        let mut writer = BufWriter::new(file);

        let header = HeaderRecord {
            record_type: "header".to_string(),
            started_at: trace.started_at,
            context: context.clone(),
        };
        writeln!(writer, "{}", serde_json::to_string(&header)?)?;

        for step in &trace.steps {
            writeln!(writer, "{}", serde_json::to_string(step)?)?;
        }

        let summary = SummaryRecord {
            record_type: "summary".to_string(),
            summary: summary.clone(),
        };
        writeln!(writer, "{}", serde_json::to_string(&summary)?)?;
        writer.flush()?;

        self.apply_retention()?;
        Ok(Some(path))
    }

    /// `<timestamp>_<short-id>.jsonl`, lexicographically chronological.
    fn file_name(trace: &Trace) -> String {
        let stamp = trace.started_at.format("%Y-%m-%dT%H-%M-%S%.3f");
        let short_id: String = trace
            .trace_id
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(8)
            .collect();
        format!("{}_{}.jsonl", stamp, short_id)
    }

    /// List trace files, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, TraceStoreError> {
        if !self.config.enabled || !self.config.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.config.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Delete oldest files until at most `max_traces` remain.
    fn apply_retention(&self) -> Result<(), TraceStoreError> {
        let files = self.list()?;
        if files.len() <= self.config.max_traces {
            return Ok(());
        }
        let excess = files.len() - self.config.max_traces;
        for path in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune trace file");
            }
        }
        Ok(())
    }

    /// Re-parse a trace file written by [`TraceStore::write`].
    pub fn read_trace(path: &Path) -> Result<StoredTrace, TraceStoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut header: Option<HeaderRecord> = None;
        let mut summary: Option<SummaryRecord> = None;
        let mut steps = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line)?;
            match value.get("type").and_then(|t| t.as_str()) {
                Some("header") => header = Some(serde_json::from_value(value)?),
                Some("summary") => summary = Some(serde_json::from_value(value)?),
                Some(_) => steps.push(serde_json::from_value(value)?),
                None => {
                    return Err(TraceStoreError::BadFile(format!(
                        "untyped record in {}",
                        path.display()
                    )));
                }
            }
        }

        let header = header
            .ok_or_else(|| TraceStoreError::BadFile(format!("missing header in {}", path.display())))?;
        let summary = summary
            .ok_or_else(|| TraceStoreError::BadFile(format!("missing summary in {}", path.display())))?;
        Ok(StoredTrace {
            context: header.context,
            started_at: header.started_at,
            steps,
            summary: summary.summary,
        })
    }
}
