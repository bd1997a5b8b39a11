//! Configuration file support for Shesha.
//!
//! All shesha data lives in a `.shesha/` directory:
//! - `.shesha/config.toml` - configuration file
//! - `.shesha/traces/` - persisted query traces
//! - `.shesha/logs/` - log files
//!
//! Config discovery searches for `.shesha/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};

/// The shesha data directory name.
pub const SHESHA_DIR: &str = ".shesha";
/// The config file name within the shesha directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Engine loop settings.
    pub engine: EngineSettings,
    /// Trace persistence settings.
    pub trace: TraceSettings,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key; falls back to SHESHA_API_KEY / OPENAI_API_KEY.
    pub api_key: Option<String>,
    /// Base URL override (Ollama, vLLM, proxies).
    pub base_url: Option<String>,
    /// Model for all calls, sub-calls included.
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Engine loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Hard cap on the main loop.
    pub max_iterations: u32,
    /// Warm-runner target for the pool.
    pub pool_size: usize,
    /// Upper bound on content passed to one llm_query.
    pub max_subcall_chars: usize,
    /// Overall wall-clock cap per query, in seconds (0 = none).
    pub query_timeout_seconds: u64,
    /// Cap on a wrapped observation fed back to the model.
    pub max_output_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            pool_size: 2,
            max_subcall_chars: 100_000,
            query_timeout_seconds: 0,
            max_output_chars: 20_000,
        }
    }
}

/// Trace persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceSettings {
    /// Whether traces are written at all.
    pub enabled: bool,
    /// Directory for trace files, relative to the `.shesha` directory
    /// unless absolute.
    pub dir: PathBuf,
    /// Maximum trace files kept.
    pub max_traces: usize,
    /// Extra redaction patterns applied on top of the built-in set.
    pub redaction_patterns: Vec<String>,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("traces"),
            max_traces: 50,
            redaction_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Load config by walking up from `start` looking for
    /// `.shesha/config.toml`. Returns the config and the `.shesha`
    /// directory it came from, or defaults rooted at `start` when no file
    /// exists.
    pub fn discover(start: &Path) -> Result<(Config, PathBuf)> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let candidate = current.join(SHESHA_DIR).join(CONFIG_FILE);
            if candidate.exists() {
                let config = Self::load(&candidate)?;
                return Ok((config, current.join(SHESHA_DIR)));
            }
            dir = current.parent();
        }
        Ok((Config::default(), start.join(SHESHA_DIR)))
    }

    /// Load config from an explicit path.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Resolve the trace directory against the `.shesha` directory.
    pub fn trace_dir(&self, shesha_dir: &Path) -> PathBuf {
        if self.trace.dir.is_absolute() {
            self.trace.dir.clone()
        } else {
            shesha_dir.join(&self.trace.dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.max_iterations, 10);
        assert_eq!(config.engine.pool_size, 2);
        assert_eq!(config.trace.max_traces, 50);
        assert!(config.trace.enabled);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "llama3"
            base_url = "http://localhost:11434"

            [engine]
            max_iterations = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.engine.max_iterations, 5);
        // Unspecified sections keep their defaults.
        assert_eq!(config.engine.pool_size, 2);
        assert!(config.trace.enabled);
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let shesha_dir = dir.path().join(SHESHA_DIR);
        std::fs::create_dir_all(&shesha_dir).unwrap();
        std::fs::write(
            shesha_dir.join(CONFIG_FILE),
            "[llm]\nmodel = \"found\"\n",
        )
        .unwrap();

        let (config, found_dir) = Config::discover(&nested).unwrap();
        assert_eq!(config.llm.model, "found");
        assert_eq!(found_dir, shesha_dir);
    }

    #[test]
    fn test_discover_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (config, shesha_dir) = Config::discover(dir.path()).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(shesha_dir, dir.path().join(SHESHA_DIR));
    }

    #[test]
    fn test_trace_dir_resolution() {
        let config = Config::default();
        let resolved = config.trace_dir(Path::new("/proj/.shesha"));
        assert_eq!(resolved, PathBuf::from("/proj/.shesha/traces"));
    }
}
