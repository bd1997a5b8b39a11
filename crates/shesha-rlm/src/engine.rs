//! The RLM engine: prompt → code → execute → observe, until FINAL.
//!
//! One query is logically sequential: it owns a single runner from the
//! pool, a message history, and a trace. Many queries may run concurrently
//! on one engine; the LLM client is shared, runners never are.
//!
//! Fatal outcomes are folded into the returned `QueryResult`; the only
//! errors `RlmEngine` raises are construction-time configuration problems.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use uuid::Uuid;

use shesha_trace::{
    QueryContext, QueryStatus, RedactionConfig, Redactor, StepType, TokenTotals, Trace,
    TraceStore, TraceSummary,
};

use crate::client::SharedClient;
use crate::error::{Result, RlmError};
use crate::executor::{DEFAULT_MAX_SUBCALL_CHARS, ExecOutcome, ExecutorAdapter};
use crate::pool::{ReleaseOutcome, RunnerHandle, RunnerPool};
use crate::prompt::{PromptSet, wrap_repl_output};
use crate::types::{
    ChatMessage, Document, MAX_ITERATIONS_SENTINEL, QueryResult, TokenUsage,
};

/// Configuration for the RLM engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model passed to every LLM call, sub-calls included.
    pub model: String,

    /// Hard cap on the main loop.
    pub max_iterations: u32,

    /// Upper bound on content passed to one `llm_query`.
    pub max_subcall_chars: usize,

    /// Overall wall-clock cap per query.
    pub query_timeout: Option<Duration>,

    /// Cap on a wrapped observation fed back to the model, in characters.
    pub max_output_chars: usize,
}

impl EngineConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_iterations: 10,
            max_subcall_chars: DEFAULT_MAX_SUBCALL_CHARS,
            query_timeout: None,
            max_output_chars: 20_000,
        }
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_subcall_chars(mut self, n: usize) -> Self {
        self.max_subcall_chars = n;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_max_output_chars(mut self, n: usize) -> Self {
        self.max_output_chars = n;
        self
    }
}

/// How the main loop ended.
enum LoopOutcome {
    /// Terminal answer produced.
    Final(String),
    /// Iteration cap hit without FINAL.
    MaxIterations,
    /// Fatal failure; the terminal error step is already in the trace.
    Failed {
        message: String,
        /// Whether the runner is still in a clean protocol state.
        clean_runner: bool,
    },
}

/// The RLM engine.
pub struct RlmEngine {
    client: SharedClient,
    pool: RunnerPool,
    prompts: PromptSet,
    config: EngineConfig,
    redactor: Redactor,
    store: Option<Arc<TraceStore>>,
}

impl RlmEngine {
    /// Create an engine with default prompts and redaction.
    pub fn new(client: SharedClient, pool: RunnerPool, config: EngineConfig) -> Result<Self> {
        if config.max_iterations == 0 {
            return Err(RlmError::Config("max_iterations must be at least 1".to_string()));
        }
        if config.max_output_chars == 0 || config.max_subcall_chars == 0 {
            return Err(RlmError::Config("output and sub-call caps must be non-zero".to_string()));
        }
        Ok(Self {
            client,
            pool,
            prompts: PromptSet::default(),
            config,
            redactor: Redactor::default_redactor(),
            store: None,
        })
    }

    /// Replace the prompt templates (validated).
    pub fn with_prompts(mut self, prompts: PromptSet) -> Result<Self> {
        prompts.validate()?;
        self.prompts = prompts;
        Ok(self)
    }

    /// Replace the redaction configuration (validated).
    pub fn with_redaction(mut self, config: &RedactionConfig) -> Result<Self> {
        self.redactor =
            Redactor::new(config).map_err(|e| RlmError::Config(e.to_string()))?;
        Ok(self)
    }

    /// Wire a persistence sink; redacted traces are handed to it at the
    /// end of every query.
    pub fn with_trace_store(mut self, store: Arc<TraceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one query over `documents`.
    ///
    /// Never fails: every fatal outcome is reported through the result's
    /// status, answer, and trace.
    pub async fn query(&self, question: &str, documents: Vec<Document>) -> QueryResult {
        let started = Instant::now();
        let mut trace = Trace::new(Uuid::new_v4().to_string());
        let mut usage = TokenUsage::default();

        let system_prompt = self
            .prompts
            .render_system(&documents, self.config.max_subcall_chars);
        let context = QueryContext {
            trace_id: trace.trace_id.clone(),
            question: question.to_string(),
            document_ids: documents.iter().map(|d| d.name.clone()).collect(),
            model: self.config.model.clone(),
            system_prompt: system_prompt.clone(),
            subcall_prompt_template: self.prompts.subcall_template.clone(),
        };

        tracing::info!(
            trace_id = %trace.trace_id,
            documents = documents.len(),
            model = %self.config.model,
            "starting query"
        );

        let outcome = self
            .run_query(question, &documents, &system_prompt, &mut trace, &mut usage)
            .await;

        let (answer, status) = match outcome {
            LoopOutcome::Final(answer) => (answer, QueryStatus::Success),
            LoopOutcome::MaxIterations => {
                (MAX_ITERATIONS_SENTINEL.to_string(), QueryStatus::MaxIterations)
            }
            LoopOutcome::Failed { message, .. } => {
                (format!("[Query failed: {}]", message), QueryStatus::Error)
            }
        };

        let execution_time = started.elapsed();
        tracing::info!(
            trace_id = %trace.trace_id,
            status = ?status,
            iterations = trace.iteration_count(),
            total_tokens = usage.total_tokens(),
            duration_ms = execution_time.as_millis() as u64,
            "query finished"
        );

        self.persist(&trace, &context, &answer, status, &usage, execution_time);

        QueryResult {
            answer,
            status,
            trace,
            token_usage: usage,
            execution_time,
        }
    }

    /// Acquire a runner, run the loop under the query deadline, and always
    /// release the runner with the right outcome.
    async fn run_query(
        &self,
        question: &str,
        documents: &[Document],
        system_prompt: &str,
        trace: &mut Trace,
        usage: &mut TokenUsage,
    ) -> LoopOutcome {
        let mut handle = match self.pool.acquire().await {
            Ok(handle) => handle,
            Err(e) => {
                let message = format!("failed to acquire runner: {}", e);
                trace.append(StepType::Error, 0, message.clone());
                return LoopOutcome::Failed {
                    message,
                    clean_runner: true,
                };
            }
        };

        if let Err(e) = handle.init(documents).await {
            let message = format!("failed to initialize runner: {}", e);
            trace.append(StepType::Error, 0, message.clone());
            self.pool.release(handle, ReleaseOutcome::Violation).await;
            return LoopOutcome::Failed {
                message,
                clean_runner: false,
            };
        }

        let outcome = match self.config.query_timeout {
            Some(deadline) => {
                match timeout(
                    deadline,
                    self.run_loop(question, system_prompt, &mut handle, trace, usage),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let message = RlmError::QueryTimeout {
                            seconds: deadline.as_secs(),
                        }
                        .to_string();
                        let iteration = trace.steps.last().map(|s| s.iteration).unwrap_or(0);
                        trace.append(StepType::Error, iteration, message.clone());
                        LoopOutcome::Failed {
                            message,
                            clean_runner: false,
                        }
                    }
                }
            }
            None => {
                self.run_loop(question, system_prompt, &mut handle, trace, usage)
                    .await
            }
        };

        let release = match &outcome {
            LoopOutcome::Failed { clean_runner, .. } if !clean_runner => ReleaseOutcome::Violation,
            _ => ReleaseOutcome::Clean,
        };
        self.pool.release(handle, release).await;
        outcome
    }

    async fn run_loop(
        &self,
        question: &str,
        system_prompt: &str,
        handle: &mut RunnerHandle,
        trace: &mut Trace,
        usage: &mut TokenUsage,
    ) -> LoopOutcome {
        let adapter = ExecutorAdapter::new(
            self.client.clone(),
            self.prompts.clone(),
            self.config.max_subcall_chars,
        );
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(question),
        ];

        for iteration in 0..self.config.max_iterations {
            let llm_started = Instant::now();
            let completion = match self.client.complete(&messages, &self.config.model).await {
                Ok(completion) => completion,
                Err(e) => {
                    let message = format!("LLM call failed: {}", e);
                    trace.append(StepType::Error, iteration, message.clone());
                    return LoopOutcome::Failed {
                        message,
                        clean_runner: true,
                    };
                }
            };
            let llm_ms = llm_started.elapsed().as_millis() as u64;
            let call_tokens = completion.total_tokens();
            usage.add(&TokenUsage::new(
                completion.prompt_tokens,
                completion.completion_tokens,
            ));

            let reply = completion.content;
            messages.push(ChatMessage::assistant(reply.clone()));

            // A bare FINAL outside any code block wins over a code block.
            if let Some(answer) = self.prompts.extract_final_direct(&reply) {
                trace.append_full(
                    StepType::FinalAnswer,
                    iteration,
                    answer.clone(),
                    Some(call_tokens),
                    Some(llm_ms),
                );
                return LoopOutcome::Final(answer);
            }

            let Some(code) = self.prompts.extract_code_block(&reply) else {
                trace.append_full(
                    StepType::Error,
                    iteration,
                    "no code block",
                    Some(call_tokens),
                    None,
                );
                messages.push(ChatMessage::user(self.prompts.render_code_reminder()));
                tracing::debug!(iteration, "reply had no code block; reminder injected");
                continue;
            };

            trace.append_full(
                StepType::CodeGenerated,
                iteration,
                code.clone(),
                Some(call_tokens),
                Some(llm_ms),
            );

            let exec_started = Instant::now();
            let outcome = adapter
                .execute(
                    handle.conn(),
                    &code,
                    &self.config.model,
                    iteration,
                    trace,
                    usage,
                )
                .await;
            let exec_ms = exec_started.elapsed().as_millis() as u64;

            match outcome {
                ExecOutcome::ProtocolViolation(violation) => {
                    let message = format!("protocol violation: {}", violation);
                    trace.append(StepType::Error, iteration, message.clone());
                    return LoopOutcome::Failed {
                        message,
                        clean_runner: false,
                    };
                }
                ExecOutcome::LlmFailed(error) => {
                    let message = format!("LLM call failed during sub-call: {}", error);
                    trace.append(StepType::Error, iteration, message.clone());
                    return LoopOutcome::Failed {
                        message,
                        clean_runner: false,
                    };
                }
                ExecOutcome::Completed(result) => {
                    if let Some(answer) = result.final_answer {
                        trace.append_full(
                            StepType::FinalAnswer,
                            iteration,
                            answer.clone(),
                            None,
                            Some(exec_ms),
                        );
                        return LoopOutcome::Final(answer);
                    }
                    let wrapped = wrap_repl_output(&result, self.config.max_output_chars);
                    trace.append_full(
                        StepType::CodeOutput,
                        iteration,
                        wrapped.clone(),
                        None,
                        Some(exec_ms),
                    );
                    messages.push(ChatMessage::user(wrapped));
                }
            }
        }

        LoopOutcome::MaxIterations
    }

    /// Hand the redacted trace to the persistence sink, if any.
    ///
    /// Failures are logged and swallowed; the query result is unaffected.
    fn persist(
        &self,
        trace: &Trace,
        context: &QueryContext,
        answer: &str,
        status: QueryStatus,
        usage: &TokenUsage,
        execution_time: Duration,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let summary = TraceSummary {
            answer: self.redactor.redact(answer),
            total_iterations: trace.iteration_count(),
            total_tokens: TokenTotals {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
            },
            total_duration_ms: execution_time.as_millis() as u64,
            status,
        };
        let redacted = trace.redacted(&self.redactor);
        let redacted_context = context.redacted(&self.redactor);
        if let Err(e) = store.write(&redacted, &redacted_context, &summary) {
            tracing::warn!(trace_id = %trace.trace_id, error = %e, "failed to persist trace");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use shesha_protocol::{ControllerFrame, ExecutionResult, FramedReader, FramedWriter, RunnerFrame};

    use super::*;
    use crate::client::{Completion, FailingClient, MockClient};
    use crate::error::Result;
    use crate::pool::{PoolConfig, RunnerConnection, RunnerFactory, RunnerProc};

    /// A factory whose runners answer `execute` frames from a shared queue
    /// of canned results, oldest first.
    struct ScriptedFactory {
        results: Arc<Mutex<VecDeque<ExecutionResult>>>,
    }

    impl ScriptedFactory {
        fn new(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Arc::new(Mutex::new(results.into())),
            }
        }
    }

    #[async_trait]
    impl RunnerFactory for ScriptedFactory {
        async fn spawn(&self) -> Result<RunnerHandle> {
            let (host_side, runner_side) = tokio::io::duplex(1024 * 1024);
            let (host_read, host_write) = tokio::io::split(host_side);
            let (runner_read, runner_write) = tokio::io::split(runner_side);

            let results = self.results.clone();
            let task = tokio::spawn(async move {
                let mut reader = FramedReader::new(runner_read);
                let mut writer = FramedWriter::new(runner_write);
                loop {
                    match reader.read_frame::<ControllerFrame>().await {
                        Ok(ControllerFrame::Init { .. }) => {}
                        Ok(ControllerFrame::Execute { .. }) => {
                            let result = results
                                .lock()
                                .unwrap()
                                .pop_front()
                                .unwrap_or_else(ExecutionResult::empty);
                            if writer.write_frame(&RunnerFrame::Result(result)).await.is_err() {
                                return;
                            }
                        }
                        Ok(ControllerFrame::LlmResponse { .. }) => {}
                        Ok(ControllerFrame::Shutdown) | Err(_) => return,
                    }
                }
            });

            Ok(RunnerHandle::new(
                0,
                RunnerConnection::new(host_read, host_write),
                RunnerProc::Task(task),
            ))
        }
    }

    fn engine_with(
        completions: Vec<Completion>,
        results: Vec<ExecutionResult>,
        config: EngineConfig,
    ) -> (RlmEngine, Arc<MockClient>) {
        let client = Arc::new(MockClient::new(completions));
        let pool = RunnerPool::new(
            Arc::new(ScriptedFactory::new(results)),
            PoolConfig::default().with_warm_target(0),
        );
        let engine = RlmEngine::new(client.clone(), pool, config).unwrap();
        (engine, client)
    }

    fn final_result(answer: &str) -> ExecutionResult {
        ExecutionResult {
            final_answer: Some(answer.to_string()),
            ..ExecutionResult::empty()
        }
    }

    fn stdout_result(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            ..ExecutionResult::empty()
        }
    }

    #[tokio::test]
    async fn test_trivial_final() {
        let (engine, _) = engine_with(
            vec![Completion::new(
                "Reading it now.\n```repl\nFINAL(context[\"d\"])\n```",
                15,
                5,
            )],
            vec![final_result("hello")],
            EngineConfig::new("test-model"),
        );

        let result = engine
            .query("echo", vec![Document::new("d", "hello")])
            .await;
        assert_eq!(result.answer, "hello");
        assert_eq!(result.status, QueryStatus::Success);

        let types: Vec<StepType> = result.trace.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(types, vec![StepType::CodeGenerated, StepType::FinalAnswer]);
    }

    #[tokio::test]
    async fn test_two_step_compute() {
        let (engine, _) = engine_with(
            vec![
                Completion::new("```repl\nprint(int(context[\"n\"]) * 2)\n```", 10, 5),
                Completion::new("```repl\nFINAL(84)\n```", 12, 4),
            ],
            vec![stdout_result("84\n"), final_result("84")],
            EngineConfig::new("test-model"),
        );

        let result = engine.query("double it", vec![Document::new("n", "42")]).await;
        assert_eq!(result.answer, "84");
        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.trace.iteration_count(), 2);

        // The observation turn carried the stdout, labeled.
        let observation = &result.trace.steps[1];
        assert_eq!(observation.step_type, StepType::CodeOutput);
        assert!(observation.content.contains("STDOUT:\n84"));
    }

    #[tokio::test]
    async fn test_direct_final_bypasses_runner() {
        let (engine, _) = engine_with(
            vec![Completion::new("FINAL(\"shortcut\")", 9, 2)],
            vec![],
            EngineConfig::new("test-model"),
        );

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.answer, "shortcut");
        assert_eq!(result.status, QueryStatus::Success);
        let types: Vec<StepType> = result.trace.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(types, vec![StepType::FinalAnswer]);
        assert_eq!(result.trace.steps[0].tokens_used, Some(11));
    }

    #[tokio::test]
    async fn test_no_code_block_reminder() {
        let (engine, client) = engine_with(
            vec![
                Completion::new("Let me think about this in prose.", 8, 3),
                Completion::new("```repl\nFINAL(\"ok\")\n```", 10, 4),
            ],
            vec![final_result("ok")],
            EngineConfig::new("test-model"),
        );

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.answer, "ok");
        assert_eq!(result.status, QueryStatus::Success);

        // Iteration 0: an error step, no code_generated.
        let first = &result.trace.steps[0];
        assert_eq!(first.step_type, StepType::Error);
        assert_eq!(first.content, "no code block");
        assert_eq!(first.iteration, 0);
        assert!(
            !result
                .trace
                .steps
                .iter()
                .any(|s| s.step_type == StepType::CodeGenerated && s.iteration == 0)
        );

        // The second request saw the reminder as its last user turn.
        let requests = client.requests();
        let reminder = &requests[1].last().unwrap().content;
        assert!(reminder.contains("code block"));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let loop_reply = "```repl\nprint(\"still thinking\")\n```";
        let (engine, _) = engine_with(
            vec![
                Completion::new(loop_reply, 10, 5),
                Completion::new(loop_reply, 10, 5),
                Completion::new(loop_reply, 10, 5),
            ],
            vec![
                stdout_result("still thinking\n"),
                stdout_result("still thinking\n"),
                stdout_result("still thinking\n"),
            ],
            EngineConfig::new("test-model").with_max_iterations(3),
        );

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.answer, MAX_ITERATIONS_SENTINEL);
        assert_eq!(result.status, QueryStatus::MaxIterations);

        let generated = result
            .trace
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::CodeGenerated)
            .count();
        let outputs = result
            .trace
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::CodeOutput)
            .count();
        assert_eq!(generated, 3);
        assert_eq!(outputs, 3);
        assert!(result.trace.terminal_step().is_none());
    }

    #[tokio::test]
    async fn test_single_iteration_cap() {
        let (engine, client) = engine_with(
            vec![Completion::new("```repl\nprint(1)\n```", 10, 5)],
            vec![stdout_result("1\n")],
            EngineConfig::new("test-model").with_max_iterations(1),
        );

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.status, QueryStatus::MaxIterations);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_error_ends_query() {
        let pool = RunnerPool::new(
            Arc::new(ScriptedFactory::new(vec![])),
            PoolConfig::default().with_warm_target(0),
        );
        let engine = RlmEngine::new(
            Arc::new(FailingClient),
            pool,
            EngineConfig::new("test-model"),
        )
        .unwrap();

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.status, QueryStatus::Error);
        assert!(result.answer.contains("LLM call failed"));
        let terminal = result.trace.terminal_step().unwrap();
        assert_eq!(terminal.step_type, StepType::Error);
    }

    #[tokio::test]
    async fn test_token_totals_match_steps() {
        let (engine, _) = engine_with(
            vec![
                Completion::new("prose only, no code", 7, 3),
                Completion::new("```repl\nFINAL(\"x\")\n```", 11, 6),
            ],
            vec![final_result("x")],
            EngineConfig::new("test-model"),
        );

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.token_usage.total_tokens(), 27);
        assert_eq!(result.trace.tokens_recorded(), 27);
        assert_eq!(
            result.token_usage.total_tokens(),
            result.token_usage.prompt_tokens + result.token_usage.completion_tokens
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let pool = RunnerPool::new(
            Arc::new(ScriptedFactory::new(vec![])),
            PoolConfig::default().with_warm_target(0),
        );
        let config = EngineConfig::new("m").with_max_iterations(0);
        assert!(matches!(
            RlmEngine::new(Arc::new(MockClient::new(vec![])), pool, config),
            Err(RlmError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        // A factory whose runner accepts init but never answers execute.
        struct SilentFactory;

        #[async_trait]
        impl RunnerFactory for SilentFactory {
            async fn spawn(&self) -> Result<RunnerHandle> {
                let (host_side, runner_side) = tokio::io::duplex(64 * 1024);
                let (host_read, host_write) = tokio::io::split(host_side);
                let task = tokio::spawn(async move {
                    // Hold the far side open without ever replying.
                    let _runner_side = runner_side;
                    std::future::pending::<()>().await;
                });
                Ok(RunnerHandle::new(
                    0,
                    RunnerConnection::new(host_read, host_write),
                    RunnerProc::Task(task),
                ))
            }
        }

        let pool = RunnerPool::new(Arc::new(SilentFactory), PoolConfig::default().with_warm_target(0));
        let client = Arc::new(MockClient::new(vec![Completion::new(
            "```repl\nprint(1)\n```",
            5,
            5,
        )]));
        let engine = RlmEngine::new(
            client,
            pool,
            EngineConfig::new("m").with_query_timeout(Duration::from_millis(200)),
        )
        .unwrap();

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.status, QueryStatus::Error);
        assert!(result.answer.contains("timed out"));
        let terminal = result.trace.terminal_step().unwrap();
        assert!(terminal.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_persistence_receives_redacted_trace() {
        use shesha_trace::StoreConfig;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TraceStore::new(StoreConfig::new(dir.path())).unwrap());

        let (engine, _) = engine_with(
            vec![Completion::new(
                "```repl\nFINAL(\"key sk-abcdef1234567890 leaked\")\n```",
                5,
                5,
            )],
            vec![final_result("key sk-abcdef1234567890 leaked")],
            EngineConfig::new("test-model"),
        );
        let engine = engine.with_trace_store(store.clone());

        let result = engine.query("q", vec![Document::new("d", "x")]).await;
        assert_eq!(result.status, QueryStatus::Success);

        let files = store.list().unwrap();
        assert_eq!(files.len(), 1);
        let stored = TraceStore::read_trace(&files[0]).unwrap();
        for step in &stored.steps {
            assert!(!step.content.contains("sk-abcdef"));
        }
        assert!(!stored.summary.answer.contains("sk-abcdef"));
        assert_eq!(stored.summary.status, QueryStatus::Success);
        // The in-memory result keeps the raw trace.
        assert!(result.trace.steps.iter().any(|s| s.content.contains("sk-abcdef")));
    }
}
