//! Host-side executor adapter.
//!
//! Drives one `execute` call against a runner as a half-duplex state
//! machine: send the code, then drain runner frames until a `result`
//! arrives. An `llm_query` frame detours into a sub-call (request step,
//! client call, response step, `llm_response` back) and never overlaps
//! with another; the runner blocks until it is answered.
//!
//! Wire violations are returned as data, not raised: the engine records
//! them and the pool destroys the runner.

use std::time::Instant;

use shesha_protocol::{ControllerFrame, ExecutionResult, RunnerFrame};
use shesha_trace::{StepType, Trace};

use crate::client::SharedClient;
use crate::pool::RunnerConnection;
use crate::prompt::PromptSet;
use crate::types::{ChatMessage, TokenUsage};

/// Default cap on characters passed to one `llm_query`.
pub const DEFAULT_MAX_SUBCALL_CHARS: usize = 100_000;

/// How one `execute` call ended.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The runner returned a result (which may itself carry an in-band
    /// evaluation error; the loop continues either way).
    Completed(ExecutionResult),
    /// The runner violated the wire protocol; it must be destroyed and
    /// the query ends.
    ProtocolViolation(String),
    /// The LLM client failed during a sub-call; the query ends with an
    /// error status.
    LlmFailed(String),
}

/// Controller-side counterpart of the runner protocol.
pub struct ExecutorAdapter {
    client: SharedClient,
    prompts: PromptSet,
    max_subcall_chars: usize,
}

impl ExecutorAdapter {
    pub fn new(client: SharedClient, prompts: PromptSet, max_subcall_chars: usize) -> Self {
        Self {
            client,
            prompts,
            max_subcall_chars,
        }
    }

    /// Run one `execute` round trip, routing sub-calls through the client.
    ///
    /// Trace steps for the sub-calls are appended here so their ordering
    /// relative to the runner conversation is exact; `usage` accumulates
    /// sub-call tokens.
    pub async fn execute(
        &self,
        conn: &mut RunnerConnection,
        code: &str,
        model: &str,
        iteration: u32,
        trace: &mut Trace,
        usage: &mut TokenUsage,
    ) -> ExecOutcome {
        if let Err(e) = conn
            .send(&ControllerFrame::Execute {
                code: code.to_string(),
            })
            .await
        {
            return ExecOutcome::ProtocolViolation(e.to_string());
        }

        loop {
            let frame = match conn.recv().await {
                Ok(frame) => frame,
                Err(e) => return ExecOutcome::ProtocolViolation(e.to_string()),
            };

            let (instruction, content) = match frame {
                RunnerFrame::Result(result) => return ExecOutcome::Completed(result),
                RunnerFrame::LlmQuery {
                    instruction,
                    content,
                } => (instruction, content),
            };

            trace.append(
                StepType::SubcallRequest,
                iteration,
                format!("{}\n{}", instruction, content),
            );

            let content_chars = content.chars().count();
            if content_chars > self.max_subcall_chars {
                // Recoverable from inside the REPL: the error string is the
                // sub-call's return value.
                let message = format!(
                    "[llm_query error] content is {} characters; the limit is {}",
                    content_chars, self.max_subcall_chars
                );
                tracing::debug!(iteration, content_chars, "rejecting oversized sub-call");
                trace.append(StepType::SubcallResponse, iteration, message.clone());
                if let Err(e) = conn
                    .send(&ControllerFrame::LlmResponse {
                        content: message,
                        tokens_used: None,
                    })
                    .await
                {
                    return ExecOutcome::ProtocolViolation(e.to_string());
                }
                continue;
            }

            let prompt = self.prompts.render_subcall(&instruction, &content);
            let started = Instant::now();
            let completion = match self
                .client
                .complete(&[ChatMessage::user(prompt)], model)
                .await
            {
                Ok(completion) => completion,
                Err(e) => return ExecOutcome::LlmFailed(e.to_string()),
            };

            let tokens = completion.total_tokens();
            usage.add(&TokenUsage::new(
                completion.prompt_tokens,
                completion.completion_tokens,
            ));
            trace.append_full(
                StepType::SubcallResponse,
                iteration,
                completion.content.clone(),
                Some(tokens),
                Some(started.elapsed().as_millis() as u64),
            );

            if let Err(e) = conn
                .send(&ControllerFrame::LlmResponse {
                    content: completion.content,
                    tokens_used: Some(tokens),
                })
                .await
            {
                return ExecOutcome::ProtocolViolation(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use shesha_protocol::{FramedReader, FramedWriter, WireLimits};

    use super::*;
    use crate::client::{Completion, MockClient};

    /// Adapter under test plus a scripted "runner" on the far side of a
    /// duplex pair.
    fn adapter(client: MockClient, max_subcall_chars: usize) -> (ExecutorAdapter, Arc<MockClient>) {
        let client = Arc::new(client);
        (
            ExecutorAdapter::new(client.clone(), PromptSet::default(), max_subcall_chars),
            client,
        )
    }

    fn wire() -> (
        RunnerConnection,
        FramedReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        FramedWriter<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (host_side, runner_side) = tokio::io::duplex(1024 * 1024);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (runner_read, runner_write) = tokio::io::split(runner_side);
        (
            RunnerConnection::new(host_read, host_write),
            FramedReader::new(runner_read),
            FramedWriter::new(runner_write),
        )
    }

    #[tokio::test]
    async fn test_plain_result() {
        let (adapter, _client) = adapter(MockClient::new(vec![]), 100);
        let (mut conn, mut runner_rx, mut runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let ControllerFrame::Execute { code } = runner_rx.read_frame().await.unwrap() else {
                panic!("expected execute");
            };
            assert_eq!(code, "print(1)");
            runner_tx
                .write_frame(&RunnerFrame::Result(ExecutionResult {
                    stdout: "1\n".to_string(),
                    ..ExecutionResult::empty()
                }))
                .await
                .unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "print(1)", "m", 0, &mut trace, &mut usage)
            .await;

        let ExecOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(result.stdout, "1\n");
        assert!(trace.steps.is_empty());
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_subcall_round_trip() {
        let (adapter, client) = adapter(
            MockClient::new(vec![Completion::new("short", 40, 10)]),
            1000,
        );
        let (mut conn, mut runner_rx, mut runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let _execute: ControllerFrame = runner_rx.read_frame().await.unwrap();
            runner_tx
                .write_frame(&RunnerFrame::LlmQuery {
                    instruction: "summarize".to_string(),
                    content: "long text".to_string(),
                })
                .await
                .unwrap();
            let ControllerFrame::LlmResponse {
                content,
                tokens_used,
            } = runner_rx.read_frame().await.unwrap()
            else {
                panic!("expected llm_response");
            };
            assert_eq!(content, "short");
            assert_eq!(tokens_used, Some(50));
            runner_tx
                .write_frame(&RunnerFrame::Result(ExecutionResult {
                    final_answer: Some("short".to_string()),
                    ..ExecutionResult::empty()
                }))
                .await
                .unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "s = llm_query(...)", "m", 3, &mut trace, &mut usage)
            .await;

        assert!(matches!(outcome, ExecOutcome::Completed(_)));
        assert_eq!(usage.prompt_tokens, 40);
        assert_eq!(usage.completion_tokens, 10);

        // Paired steps at the same iteration, request before response.
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.steps[0].step_type, StepType::SubcallRequest);
        assert_eq!(trace.steps[1].step_type, StepType::SubcallResponse);
        assert_eq!(trace.steps[0].iteration, 3);
        assert_eq!(trace.steps[1].iteration, 3);
        assert_eq!(trace.steps[1].tokens_used, Some(50));

        // The sub-call prompt wrapped the content in the untrusted banner.
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][0].content.contains(crate::prompt::UNTRUSTED_BEGIN));
        assert!(requests[0][0].content.contains("long text"));

        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_subcall_over_limit_is_recoverable() {
        let (adapter, client) = adapter(MockClient::new(vec![]), 10);
        let (mut conn, mut runner_rx, mut runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let _execute: ControllerFrame = runner_rx.read_frame().await.unwrap();
            runner_tx
                .write_frame(&RunnerFrame::LlmQuery {
                    instruction: "summarize".to_string(),
                    content: "x".repeat(11),
                })
                .await
                .unwrap();
            let ControllerFrame::LlmResponse {
                content,
                tokens_used,
            } = runner_rx.read_frame().await.unwrap()
            else {
                panic!("expected llm_response");
            };
            assert!(content.contains("limit is 10"));
            assert_eq!(tokens_used, None);
            runner_tx
                .write_frame(&RunnerFrame::Result(ExecutionResult::empty()))
                .await
                .unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "code", "m", 0, &mut trace, &mut usage)
            .await;

        assert!(matches!(outcome, ExecOutcome::Completed(_)));
        // The client was never invoked and no tokens were spent.
        assert_eq!(client.request_count(), 0);
        assert_eq!(usage.total_tokens(), 0);
        // Still a paired request/response in the trace.
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.steps[1].step_type, StepType::SubcallResponse);
        assert_eq!(trace.steps[1].tokens_used, None);

        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_subcall_at_limit_is_accepted() {
        let (adapter, client) = adapter(
            MockClient::new(vec![Completion::new("ok", 1, 1)]),
            10,
        );
        let (mut conn, mut runner_rx, mut runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let _execute: ControllerFrame = runner_rx.read_frame().await.unwrap();
            runner_tx
                .write_frame(&RunnerFrame::LlmQuery {
                    instruction: "i".to_string(),
                    content: "x".repeat(10),
                })
                .await
                .unwrap();
            let ControllerFrame::LlmResponse { content, .. } =
                runner_rx.read_frame().await.unwrap()
            else {
                panic!("expected llm_response");
            };
            assert_eq!(content, "ok");
            runner_tx
                .write_frame(&RunnerFrame::Result(ExecutionResult::empty()))
                .await
                .unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        adapter
            .execute(&mut conn, "code", "m", 0, &mut trace, &mut usage)
            .await;
        assert_eq!(client.request_count(), 1);
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_is_violation() {
        let (adapter, _client) = adapter(MockClient::new(vec![]), 100);
        let (mut conn, mut runner_rx, runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let _execute: ControllerFrame = runner_rx.read_frame().await.unwrap();
            let mut raw = runner_tx.into_inner();
            raw.write_all(b"this is not json\n").await.unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "code", "m", 0, &mut trace, &mut usage)
            .await;
        let ExecOutcome::ProtocolViolation(message) = outcome else {
            panic!("expected violation");
        };
        assert!(message.contains("malformed frame"));
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_line_over_limit_is_violation() {
        let limits = WireLimits::default()
            .with_max_line_length(1024)
            .with_max_buffer_size(64 * 1024);
        let (host_side, runner_side) = tokio::io::duplex(256 * 1024);
        let (host_read, host_write) = tokio::io::split(host_side);
        let mut conn = RunnerConnection::with_limits(host_read, host_write, limits);

        let (mut runner_read, mut runner_write) = tokio::io::split(runner_side);
        let runner = tokio::spawn(async move {
            let mut reader = FramedReader::new(&mut runner_read);
            let _execute: ControllerFrame = reader.read_frame().await.unwrap();
            let mut line = vec![b'a'; 4096];
            line.push(b'\n');
            runner_write.write_all(&line).await.unwrap();
        });

        let (adapter, _client) = adapter(MockClient::new(vec![]), 100);
        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "code", "m", 0, &mut trace, &mut usage)
            .await;
        let ExecOutcome::ProtocolViolation(message) = outcome else {
            panic!("expected violation");
        };
        assert!(message.contains("1024 bytes"));
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_llm_failure_during_subcall() {
        let (adapter, _client) = adapter(MockClient::new(vec![]), 1000);
        let (mut conn, mut runner_rx, mut runner_tx) = wire();

        let runner = tokio::spawn(async move {
            let _execute: ControllerFrame = runner_rx.read_frame().await.unwrap();
            runner_tx
                .write_frame(&RunnerFrame::LlmQuery {
                    instruction: "i".to_string(),
                    content: "c".to_string(),
                })
                .await
                .unwrap();
        });

        let mut trace = Trace::new_random();
        let mut usage = TokenUsage::default();
        let outcome = adapter
            .execute(&mut conn, "code", "m", 0, &mut trace, &mut usage)
            .await;
        assert!(matches!(outcome, ExecOutcome::LlmFailed(_)));
        runner.await.unwrap();
    }
}
