//! Cross-crate end-to-end tests.
//!
//! These run the full stack (engine, executor adapter, framed protocol,
//! and the real interpreter) with a scripted LLM client and in-process
//! runner sessions over duplex streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;

use shesha_rlm::{
    Completion, Document, EngineConfig, MAX_ITERATIONS_SENTINEL, MockClient, PoolConfig,
    ReleaseOutcome, RlmEngine, RunnerConnection, RunnerFactory, RunnerHandle, RunnerPool,
    RunnerProc,
};
use shesha_runner::RunnerSession;
use shesha_trace::{QueryStatus, StepType};

/// Factory that backs each runner with an in-process `RunnerSession` over
/// a duplex pair: the real interpreter, no subprocess.
struct InProcessFactory {
    next_id: AtomicU64,
}

impl InProcessFactory {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait::async_trait]
impl RunnerFactory for InProcessFactory {
    async fn spawn(&self) -> shesha_rlm::Result<RunnerHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (host_side, runner_side) = tokio::io::duplex(1024 * 1024);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (runner_read, runner_write) = tokio::io::split(runner_side);

        let task = tokio::spawn(async move {
            // Session errors surface host-side as protocol violations.
            let _ = RunnerSession::new(runner_read, runner_write).run().await;
        });

        Ok(RunnerHandle::new(
            id,
            RunnerConnection::new(host_read, host_write),
            RunnerProc::Task(task),
        ))
    }
}

fn engine(completions: Vec<Completion>, config: EngineConfig) -> (RlmEngine, Arc<MockClient>) {
    let client = Arc::new(MockClient::new(completions));
    let pool = RunnerPool::new(
        Arc::new(InProcessFactory::new()),
        PoolConfig::default().with_warm_target(0),
    );
    let engine = RlmEngine::new(client.clone(), pool, config).unwrap();
    (engine, client)
}

fn repl(code: &str) -> Completion {
    Completion::new(format!("```repl\n{}\n```", code), 20, 10)
}

#[tokio::test]
async fn test_trivial_final() {
    let (engine, _) = engine(
        vec![repl("FINAL(context[\"d\"])")],
        EngineConfig::new("test-model"),
    );

    let result = engine.query("echo", vec![Document::new("d", "hello")]).await;

    assert_eq!(result.answer, "hello");
    assert_eq!(result.status, QueryStatus::Success);
    let types: Vec<StepType> = result.trace.steps.iter().map(|s| s.step_type).collect();
    assert_eq!(types, vec![StepType::CodeGenerated, StepType::FinalAnswer]);
}

#[tokio::test]
async fn test_two_step_compute() {
    let (engine, client) = engine(
        vec![repl("print(int(context[\"n\"]) * 2)"), repl("FINAL(84)")],
        EngineConfig::new("test-model"),
    );

    let result = engine.query("double n", vec![Document::new("n", "42")]).await;

    assert_eq!(result.answer, "84");
    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.trace.iteration_count(), 2);

    // The model observed the printed value before answering.
    let requests = client.requests();
    let observation = &requests[1].last().unwrap().content;
    assert!(observation.contains("STDOUT:\n84"));
}

#[tokio::test]
async fn test_sub_llm_delegation() {
    let long_text = "lorem ipsum ".repeat(200);
    let (engine, client) = engine(
        vec![
            repl("s = llm_query(\"summarize\", context[\"doc\"])"),
            Completion::new("short", 100, 2), // the sub-call's reply
            repl("FINAL(s)"),
        ],
        EngineConfig::new("test-model"),
    );

    let result = engine
        .query("summarize the doc", vec![Document::new("doc", long_text.clone())])
        .await;

    assert_eq!(result.answer, "short");
    assert_eq!(result.status, QueryStatus::Success);

    // Paired sub-call steps at iteration 0, final answer at iteration 1.
    let request_step = result
        .trace
        .steps
        .iter()
        .find(|s| s.step_type == StepType::SubcallRequest)
        .unwrap();
    let response_step = result
        .trace
        .steps
        .iter()
        .find(|s| s.step_type == StepType::SubcallResponse)
        .unwrap();
    assert_eq!(request_step.iteration, 0);
    assert_eq!(response_step.iteration, 0);
    let final_step = result.trace.terminal_step().unwrap();
    assert_eq!(final_step.step_type, StepType::FinalAnswer);
    assert_eq!(final_step.iteration, 1);

    // Main calls plus the sub-call: 20+10 + 100+2 + 20+10.
    assert_eq!(result.token_usage.total_tokens(), 162);
    assert_eq!(result.trace.tokens_recorded(), 162);

    // The sub-call prompt wrapped the document under the untrusted banner.
    let sub_request = &client.requests()[1][0].content;
    assert!(sub_request.contains(shesha_rlm::UNTRUSTED_BEGIN));
    assert!(sub_request.contains("lorem ipsum"));
}

#[tokio::test]
async fn test_no_code_block_reminder() {
    let (engine, _) = engine(
        vec![
            Completion::new("I will start by planning my approach.", 8, 4),
            repl("FINAL(\"ok\")"),
        ],
        EngineConfig::new("test-model"),
    );

    let result = engine.query("q", vec![Document::new("d", "x")]).await;

    assert_eq!(result.answer, "ok");
    assert_eq!(result.status, QueryStatus::Success);

    let iteration0: Vec<&StepType> = result
        .trace
        .steps
        .iter()
        .filter(|s| s.iteration == 0)
        .map(|s| &s.step_type)
        .collect();
    assert_eq!(iteration0, vec![&StepType::Error]);
    assert_eq!(result.trace.steps[0].content, "no code block");
}

#[tokio::test]
async fn test_protocol_violation_buffer_limit() {
    /// A runner that floods the host with bytes and no newline.
    struct FloodingFactory;

    #[async_trait::async_trait]
    impl RunnerFactory for FloodingFactory {
        async fn spawn(&self) -> shesha_rlm::Result<RunnerHandle> {
            let (host_side, runner_side) = tokio::io::duplex(1024 * 1024);
            let (host_read, host_write) = tokio::io::split(host_side);
            let (_runner_read, mut runner_write) = tokio::io::split(runner_side);

            let task = tokio::spawn(async move {
                let chunk = vec![b'a'; 1024 * 1024];
                for _ in 0..11 {
                    if runner_write.write_all(&chunk).await.is_err() {
                        return;
                    }
                }
            });

            Ok(RunnerHandle::new(
                1,
                RunnerConnection::new(host_read, host_write),
                RunnerProc::Task(task),
            ))
        }
    }

    let client = Arc::new(MockClient::new(vec![repl("print(1)")]));
    let pool = RunnerPool::new(
        Arc::new(FloodingFactory),
        PoolConfig::default().with_warm_target(0),
    );
    let engine = RlmEngine::new(client, pool, EngineConfig::new("test-model")).unwrap();

    let result = engine.query("q", vec![Document::new("d", "x")]).await;

    assert_eq!(result.status, QueryStatus::Error);
    let terminal = result.trace.terminal_step().unwrap();
    assert_eq!(terminal.step_type, StepType::Error);
    assert!(terminal.content.contains("buffer"));
}

#[tokio::test]
async fn test_iteration_cap() {
    let (engine, _) = engine(
        vec![
            repl("print(\"still thinking\")"),
            repl("print(\"still thinking\")"),
            repl("print(\"still thinking\")"),
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
    assert!(
        !result
            .trace
            .steps
            .iter()
            .any(|s| s.step_type == StepType::FinalAnswer)
    );
}

#[tokio::test]
async fn test_repl_state_persists_across_iterations() {
    let (engine, _) = engine(
        vec![
            repl("total = 0"),
            repl("total = total + int(context[\"n\"])"),
            repl("FINAL(total * 2)"),
        ],
        EngineConfig::new("test-model"),
    );

    let result = engine.query("q", vec![Document::new("n", "21")]).await;
    assert_eq!(result.answer, "42");
    assert_eq!(result.status, QueryStatus::Success);
}

#[tokio::test]
async fn test_runtime_error_is_recoverable() {
    let (engine, client) = engine(
        vec![repl("undefined_name + 1"), repl("FINAL(\"recovered\")")],
        EngineConfig::new("test-model"),
    );

    let result = engine.query("q", vec![Document::new("d", "x")]).await;
    assert_eq!(result.answer, "recovered");
    assert_eq!(result.status, QueryStatus::Success);

    // The evaluation error reached the model as a labeled observation.
    let requests = client.requests();
    let observation = &requests[1].last().unwrap().content;
    assert!(observation.contains("ERROR:"));
    assert!(observation.contains("NameError"));
}

#[tokio::test]
async fn test_oversized_subcall_is_recoverable() {
    let (engine, client) = engine(
        vec![
            repl("s = llm_query(\"summarize\", context[\"doc\"])"),
            repl("FINAL(s)"),
        ],
        EngineConfig::new("test-model").with_max_subcall_chars(8),
    );

    let result = engine
        .query("q", vec![Document::new("doc", "far too long for the limit")])
        .await;

    // The rejection string became the sub-call's return value and the
    // session survived to the next iteration.
    assert_eq!(result.status, QueryStatus::Success);
    assert!(result.answer.contains("limit is 8"));
    // The sub-call never reached the LLM client: two main calls only.
    assert_eq!(client.request_count(), 2);
}

#[tokio::test]
async fn test_trace_round_trips_through_store() {
    use shesha_trace::{StoreConfig, TraceStore};

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TraceStore::new(StoreConfig::new(dir.path())).unwrap());

    let (engine, _) = engine(
        vec![repl("FINAL(context[\"d\"])")],
        EngineConfig::new("test-model"),
    );
    let engine = engine.with_trace_store(store.clone());

    let result = engine.query("echo", vec![Document::new("d", "hello")]).await;

    let files = store.list().unwrap();
    assert_eq!(files.len(), 1);
    let stored = TraceStore::read_trace(&files[0]).unwrap();
    assert_eq!(stored.context.trace_id, result.trace.trace_id);
    assert_eq!(stored.context.question, "echo");
    assert_eq!(stored.context.document_ids, vec!["d".to_string()]);
    assert_eq!(stored.steps.len(), result.trace.steps.len());
    assert_eq!(stored.summary.answer, "hello");
    assert_eq!(stored.summary.status, QueryStatus::Success);
    assert_eq!(
        stored.summary.total_tokens.prompt + stored.summary.total_tokens.completion,
        result.token_usage.total_tokens()
    );
}

#[tokio::test]
async fn test_pool_release_on_every_path() {
    // Run several queries back to back on one pool; if releases leaked,
    // the cap would starve later queries.
    let client = Arc::new(MockClient::new(vec![
        repl("FINAL(\"one\")"),
        Completion::new("no code here", 1, 1),
        Completion::new("still no code", 1, 1),
        repl("FINAL(\"two\")"),
    ]));
    let pool = RunnerPool::new(
        Arc::new(InProcessFactory::new()),
        PoolConfig::default().with_warm_target(0).with_max_runners(1),
    );
    let engine = RlmEngine::new(
        client,
        pool.clone(),
        EngineConfig::new("test-model").with_max_iterations(3),
    )
    .unwrap();

    let first = engine.query("q", vec![Document::new("d", "x")]).await;
    assert_eq!(first.answer, "one");

    let second = engine.query("q", vec![Document::new("d", "x")]).await;
    assert_eq!(second.answer, "two");

    pool.shutdown().await;
    let handle = pool.acquire().await;
    assert!(handle.is_err());
}

#[tokio::test]
async fn test_release_outcome_api() {
    // Direct pool exercise alongside the engine-driven tests.
    let pool = RunnerPool::new(
        Arc::new(InProcessFactory::new()),
        PoolConfig::default().with_warm_target(0),
    );
    let handle = pool.acquire().await.unwrap();
    pool.release(handle, ReleaseOutcome::Violation).await;
    pool.shutdown().await;
}
