//! The runner's frame loop.
//!
//! A session reads controller frames from its input stream and answers on
//! its output stream:
//!
//! - `init` binds the document corpus (once, before any execute)
//! - `execute` evaluates code; while evaluation is inside `llm_query`, the
//!   session emits an `llm_query` frame and blocks for the matching
//!   `llm_response` (half-duplex, never more than one outstanding)
//! - `shutdown` ends the session cleanly
//!
//! Captured output is clipped before framing so a result line stays well
//! under the controller's line limit.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use shesha_protocol::{
    ControllerFrame, ExecutionResult, FramedReader, FramedWriter, ProtocolError, RunnerFrame,
    WireLimits,
};

use crate::interp::{ExecOutput, Interpreter, ReplHost};

/// Per-field cap on captured output embedded in a result frame.
///
/// Keeps the framed result line comfortably below the controller-side
/// 1 MiB line limit even with all fields at capacity.
pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;

/// Line/buffer limits for reading controller frames.
///
/// The controller is trusted, so these only bound memory; they must be
/// large enough for an `init` frame carrying a whole corpus.
const RUNNER_MAX_LINE: usize = 64 * 1024 * 1024;

const CAPTURE_MARKER: &str = "\n…[output truncated]";

/// Errors that end a session abnormally.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// One runner lifetime: a persistent interpreter behind the frame loop.
pub struct RunnerSession<R, W> {
    reader: FramedReader<R>,
    writer: FramedWriter<W>,
    interp: Interpreter,
}

impl<R, W> RunnerSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        let limits = WireLimits::default()
            .with_max_line_length(RUNNER_MAX_LINE)
            .with_max_buffer_size(RUNNER_MAX_LINE)
            .without_read_deadline();
        Self {
            reader: FramedReader::with_limits(input, limits),
            writer: FramedWriter::new(output),
            interp: Interpreter::new(),
        }
    }

    /// Serve frames until shutdown or stream close.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            let frame = match self.reader.read_frame::<ControllerFrame>().await {
                Ok(frame) => frame,
                Err(ProtocolError::UnexpectedEof) => {
                    tracing::debug!("controller closed the stream; exiting");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match frame {
                ControllerFrame::Init { documents } => {
                    if self.interp.has_context() {
                        tracing::warn!("duplicate init frame; replacing context");
                    }
                    let count = documents.len();
                    self.interp.load_documents(
                        documents.into_iter().map(|d| (d.name, d.content)).collect(),
                    );
                    tracing::debug!(documents = count, "context loaded");
                }
                ControllerFrame::Execute { code } => {
                    let shutdown = self.handle_execute(&code).await?;
                    if shutdown {
                        tracing::debug!("shutdown received mid-execute; exiting");
                        return Ok(());
                    }
                }
                ControllerFrame::LlmResponse { .. } => {
                    tracing::warn!("unexpected llm_response outside execute; ignoring");
                }
                ControllerFrame::Shutdown => {
                    tracing::debug!("shutdown received; exiting");
                    return Ok(());
                }
            }
        }
    }

    /// Evaluate one execute frame and reply with its result.
    ///
    /// Returns true when a shutdown frame arrived while a sub-call was
    /// pending, in which case the result is still sent first.
    async fn handle_execute(&mut self, code: &str) -> Result<bool, SessionError> {
        if !self.interp.has_context() {
            let result = ExecutionResult::from_error("RuntimeError: runner not initialized");
            self.writer.write_frame(&RunnerFrame::Result(result)).await?;
            return Ok(false);
        }

        let (output, shutdown) = {
            let mut host = WireHost {
                reader: &mut self.reader,
                writer: &mut self.writer,
                shutdown: false,
            };
            let output = self.interp.execute(code, &mut host).await;
            (output, host.shutdown)
        };

        let result = to_execution_result(output);
        self.writer.write_frame(&RunnerFrame::Result(result)).await?;
        Ok(shutdown)
    }
}

/// Host that round-trips `llm_query` over the session's own streams.
struct WireHost<'a, R, W> {
    reader: &'a mut FramedReader<R>,
    writer: &'a mut FramedWriter<W>,
    shutdown: bool,
}

#[async_trait]
impl<R, W> ReplHost for WireHost<'_, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn llm_query(&mut self, instruction: &str, content: &str) -> Result<String, String> {
        self.writer
            .write_frame(&RunnerFrame::LlmQuery {
                instruction: instruction.to_string(),
                content: content.to_string(),
            })
            .await
            .map_err(|e| e.to_string())?;

        match self.reader.read_frame::<ControllerFrame>().await {
            Ok(ControllerFrame::LlmResponse { content, .. }) => Ok(content),
            Ok(ControllerFrame::Shutdown) => {
                self.shutdown = true;
                Err("session shut down during sub-call".to_string())
            }
            Ok(other) => Err(format!("expected llm_response, got {:?}", frame_name(&other))),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn frame_name(frame: &ControllerFrame) -> &'static str {
    match frame {
        ControllerFrame::Init { .. } => "init",
        ControllerFrame::Execute { .. } => "execute",
        ControllerFrame::LlmResponse { .. } => "llm_response",
        ControllerFrame::Shutdown => "shutdown",
    }
}

fn to_execution_result(output: ExecOutput) -> ExecutionResult {
    ExecutionResult {
        stdout: clip(output.stdout),
        stderr: clip(output.stderr),
        return_value: output.return_value.to_json(),
        final_answer: output.final_answer,
        error: output.error,
    }
}

fn clip(text: String) -> String {
    if text.len() <= MAX_CAPTURE_BYTES {
        return text;
    }
    let mut end = MAX_CAPTURE_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut clipped = text[..end].to_string();
    clipped.push_str(CAPTURE_MARKER);
    clipped
}
