//! shesha: Recursive Language Model runtime.
//!
//! Lets a language model explore a corpus of documents by writing code
//! into a sandboxed REPL, recursing into sub-LLM calls where the corpus is
//! too large to read directly.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, prelude::*};

use config::Config;
use shesha_rlm::{
    Document, EngineConfig, OpenAiClient, OpenAiConfig, PoolConfig, ProcessRunnerFactory,
    RlmEngine, RunnerPool, SharedClient,
};
use shesha_trace::{QueryStatus, RedactionConfig, StoreConfig, TraceStore};

#[derive(Parser)]
#[command(name = "shesha", version, about = "Recursive Language Model runtime")]
struct Cli {
    /// Path to a config file (default: discovered .shesha/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one query over a set of document files.
    Query {
        /// Files to load as documents.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// The question to answer.
        #[arg(short, long)]
        question: String,

        /// Model override.
        #[arg(long)]
        model: Option<String>,

        /// Iteration cap override.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Disable trace persistence for this query.
        #[arg(long)]
        no_trace: bool,
    },

    /// List persisted trace files.
    Traces,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("resolving working directory")?;
    let (config, shesha_dir) = match &cli.config {
        Some(path) => (Config::load(path)?, cwd.join(config::SHESHA_DIR)),
        None => Config::discover(&cwd)?,
    };

    init_logging(&shesha_dir);

    match cli.command {
        Command::Query {
            files,
            question,
            model,
            max_iterations,
            no_trace,
        } => run_query(config, shesha_dir, files, question, model, max_iterations, no_trace).await,
        Command::Traces => list_traces(config, shesha_dir),
    }
}

fn init_logging(shesha_dir: &std::path::Path) {
    let filter = EnvFilter::try_from_env("SHESHA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = shesha_dir.join("logs");
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, "shesha.log");
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(appender))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }
}

fn build_client(config: &Config) -> Result<SharedClient> {
    let api_key = config
        .llm
        .api_key
        .clone()
        .or_else(|| std::env::var("SHESHA_API_KEY").ok())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    let api_key = match (api_key, &config.llm.base_url) {
        (Some(key), _) => key,
        // Local providers typically need no key.
        (None, Some(_)) => String::new(),
        (None, None) => bail!(
            "no API key configured; set llm.api_key in .shesha/config.toml \
             or the SHESHA_API_KEY / OPENAI_API_KEY environment variable"
        ),
    };

    let mut client_config = OpenAiConfig::new(api_key);
    if let Some(base_url) = &config.llm.base_url {
        client_config = client_config.with_base_url(base_url.clone());
    }
    Ok(Arc::new(OpenAiClient::new(client_config)?))
}

async fn run_query(
    config: Config,
    shesha_dir: PathBuf,
    files: Vec<PathBuf>,
    question: String,
    model: Option<String>,
    max_iterations: Option<u32>,
    no_trace: bool,
) -> Result<()> {
    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading document {}", path.display()))?;
        documents.push(Document::from_file_content(path.to_string_lossy(), &content));
    }

    let client = build_client(&config)?;
    let pool = RunnerPool::new(
        Arc::new(ProcessRunnerFactory::discover()),
        PoolConfig::default().with_warm_target(config.engine.pool_size),
    );
    pool.warm_up().await;

    let mut engine_config = EngineConfig::new(model.unwrap_or_else(|| config.llm.model.clone()))
        .with_max_iterations(max_iterations.unwrap_or(config.engine.max_iterations))
        .with_max_subcall_chars(config.engine.max_subcall_chars)
        .with_max_output_chars(config.engine.max_output_chars);
    if config.engine.query_timeout_seconds > 0 {
        engine_config = engine_config
            .with_query_timeout(Duration::from_secs(config.engine.query_timeout_seconds));
    }

    let mut redaction = RedactionConfig::new();
    for pattern in &config.trace.redaction_patterns {
        redaction = redaction.with_pattern(pattern.clone());
    }

    let mut engine = RlmEngine::new(client, pool.clone(), engine_config)?
        .with_redaction(&redaction)?;

    if config.trace.enabled && !no_trace {
        let store_config = StoreConfig::new(config.trace_dir(&shesha_dir))
            .with_max_traces(config.trace.max_traces);
        engine = engine.with_trace_store(Arc::new(TraceStore::new(store_config)?));
    }

    let result = engine.query(&question, documents).await;
    pool.shutdown().await;

    println!("{}", result.answer);
    eprintln!(
        "status: {} | iterations: {} | tokens: {} ({} prompt, {} completion) | {:.1}s",
        match result.status {
            QueryStatus::Success => "success",
            QueryStatus::MaxIterations => "max_iterations",
            QueryStatus::Error => "error",
        },
        result.trace.iteration_count(),
        result.token_usage.total_tokens(),
        result.token_usage.prompt_tokens,
        result.token_usage.completion_tokens,
        result.execution_time.as_secs_f64()
    );

    if result.status == QueryStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn list_traces(config: Config, shesha_dir: PathBuf) -> Result<()> {
    let store = TraceStore::new(
        StoreConfig::new(config.trace_dir(&shesha_dir)).with_max_traces(config.trace.max_traces),
    )?;
    let files = store.list()?;
    if files.is_empty() {
        println!("no traces recorded");
        return Ok(());
    }
    for path in files {
        println!("{}", path.display());
    }
    Ok(())
}
