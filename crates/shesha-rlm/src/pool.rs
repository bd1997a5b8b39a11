//! Runner lifecycle: connections, process handles, and the warm pool.
//!
//! A runner is owned exclusively by one query and destroyed on release;
//! REPL state persists inside a runner, so recycling one across queries
//! would leak the previous corpus. The pool keeps a small set of
//! pre-warmed runners to hide spawn latency and replaces them in the
//! background as they are consumed.
//!
//! Spawning goes through the [`RunnerFactory`] trait: production uses
//! [`ProcessRunnerFactory`] (the `shesha-runner` binary over pipes), tests
//! substitute in-process sessions over duplex streams.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use shesha_protocol::{
    ControllerFrame, DocumentPayload, FramedReader, FramedWriter, ProtocolError, RunnerFrame,
    WireLimits,
};

use crate::error::{Result, RlmError};
use crate::types::Document;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Framed, limit-enforcing channel to one runner.
pub struct RunnerConnection {
    reader: FramedReader<BoxedRead>,
    writer: FramedWriter<BoxedWrite>,
}

impl RunnerConnection {
    /// Wrap raw streams with the default (controller-side) wire limits.
    pub fn new(
        input: impl AsyncRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::with_limits(input, output, WireLimits::default())
    }

    pub fn with_limits(
        input: impl AsyncRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
        limits: WireLimits,
    ) -> Self {
        Self {
            reader: FramedReader::with_limits(Box::new(input) as BoxedRead, limits),
            writer: FramedWriter::new(Box::new(output) as BoxedWrite),
        }
    }

    /// Send one controller frame.
    pub async fn send(&mut self, frame: &ControllerFrame) -> std::result::Result<(), ProtocolError> {
        self.writer.write_frame(frame).await
    }

    /// Receive one runner frame, subject to the wire limits.
    pub async fn recv(&mut self) -> std::result::Result<RunnerFrame, ProtocolError> {
        self.reader.read_frame().await
    }
}

/// What backs a runner: a child process, an in-process task, or nothing.
pub enum RunnerProc {
    Child(Child),
    Task(tokio::task::JoinHandle<()>),
    Detached,
}

/// An exclusively owned runner.
pub struct RunnerHandle {
    id: u64,
    conn: RunnerConnection,
    proc: RunnerProc,
}

impl RunnerHandle {
    pub fn new(id: u64, conn: RunnerConnection, proc: RunnerProc) -> Self {
        Self { id, conn, proc }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The framed channel; callers drive the protocol through this.
    pub fn conn(&mut self) -> &mut RunnerConnection {
        &mut self.conn
    }

    /// Bind a document set into the runner's `context` map.
    pub async fn init(&mut self, documents: &[Document]) -> Result<()> {
        let payload = documents
            .iter()
            .map(|d| DocumentPayload::new(d.name.clone(), d.content.clone()))
            .collect();
        self.conn
            .send(&ControllerFrame::Init { documents: payload })
            .await?;
        Ok(())
    }

    /// Politely stop the runner, force-killing after the grace period.
    pub async fn shutdown_graceful(mut self, grace: Duration) {
        let _ = self.conn.send(&ControllerFrame::Shutdown).await;
        match self.proc {
            RunnerProc::Child(mut child) => {
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    tracing::warn!(runner = self.id, "runner ignored shutdown; killing");
                    let _ = child.start_kill();
                }
            }
            RunnerProc::Task(task) => {
                let abort = task.abort_handle();
                if tokio::time::timeout(grace, task).await.is_err() {
                    tracing::warn!(runner = self.id, "runner task ignored shutdown; aborting");
                    abort.abort();
                }
            }
            RunnerProc::Detached => {}
        }
    }

    /// Destroy the runner immediately.
    pub fn force_kill(mut self) {
        match &mut self.proc {
            RunnerProc::Child(child) => {
                let _ = child.start_kill();
            }
            RunnerProc::Task(task) => task.abort(),
            RunnerProc::Detached => {}
        }
    }
}

/// How a runner came back from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Query ended normally; the runner gets a polite shutdown.
    Clean,
    /// Protocol violation or timeout; the runner is killed on the spot.
    Violation,
}

/// Source of fresh runners.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn spawn(&self) -> Result<RunnerHandle>;
}

/// Spawns the `shesha-runner` binary with piped stdio.
pub struct ProcessRunnerFactory {
    command: PathBuf,
    args: Vec<String>,
    next_id: AtomicU64,
}

impl ProcessRunnerFactory {
    /// Use an explicit runner executable.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Locate the runner next to the current executable, falling back to
    /// `shesha-runner` on PATH.
    pub fn discover() -> Self {
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("shesha-runner")))
            .filter(|p| p.exists());
        Self::new(sibling.unwrap_or_else(|| PathBuf::from("shesha-runner")))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl RunnerFactory for ProcessRunnerFactory {
    async fn spawn(&self) -> Result<RunnerHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RlmError::RunnerSpawn(format!("{}: {}", self.command.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RlmError::RunnerSpawn("failed to capture runner stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RlmError::RunnerSpawn("failed to capture runner stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(id, stderr);
        }

        tracing::debug!(runner = id, command = %self.command.display(), "spawned runner");
        Ok(RunnerHandle::new(
            id,
            RunnerConnection::new(stdout, stdin),
            RunnerProc::Child(child),
        ))
    }
}

/// Surface runner diagnostics in our own logs.
fn forward_stderr(id: u64, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(runner = id, "{}", line);
        }
    });
}

/// Configuration for the warm pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How many idle runners to keep pre-warmed.
    pub warm_target: usize,
    /// Hard cap on live runners (idle plus checked out).
    pub max_runners: usize,
    /// Grace period for polite shutdown before force-kill.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            warm_target: 2,
            max_runners: 8,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warm_target(mut self, n: usize) -> Self {
        self.warm_target = n;
        self
    }

    pub fn with_max_runners(mut self, n: usize) -> Self {
        self.max_runners = n;
        self
    }
}

struct PoolState {
    idle: Vec<RunnerHandle>,
    live: usize,
    shut_down: bool,
}

struct PoolInner {
    factory: Arc<dyn RunnerFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Warm pool of single-use runners.
///
/// Acquire hands out an idle runner or spawns a fresh one up to the cap;
/// release always destroys the runner and replenishment happens in the
/// background. Callers may acquire concurrently; there is no fairness
/// guarantee. Cloning the pool shares the same state.
#[derive(Clone)]
pub struct RunnerPool {
    inner: Arc<PoolInner>,
}

impl RunnerPool {
    pub fn new(factory: Arc<dyn RunnerFactory>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    live: 0,
                    shut_down: false,
                }),
            }),
        }
    }

    /// Spawn runners up to the warm target. Call once at startup; the pool
    /// works without it, at the cost of spawn latency on first acquire.
    pub async fn warm_up(&self) {
        replenish(self.inner.clone()).await;
    }

    /// Take exclusive ownership of a runner.
    pub async fn acquire(&self) -> Result<RunnerHandle> {
        {
            let mut state = self.inner.state.lock().await;
            if state.shut_down {
                return Err(RlmError::PoolExhausted("pool is shut down".to_string()));
            }
            if let Some(handle) = state.idle.pop() {
                drop(state);
                self.spawn_replenish();
                return Ok(handle);
            }
            if state.live >= self.inner.config.max_runners {
                return Err(RlmError::PoolExhausted(format!(
                    "all {} runners are in use",
                    self.inner.config.max_runners
                )));
            }
            state.live += 1;
        }

        match self.inner.factory.spawn().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.inner.state.lock().await.live -= 1;
                Err(e)
            }
        }
    }

    /// Return a runner. It is always destroyed, never reissued, and a
    /// replacement is started asynchronously toward the warm target.
    pub async fn release(&self, handle: RunnerHandle, outcome: ReleaseOutcome) {
        let shut_down = {
            let mut state = self.inner.state.lock().await;
            state.live -= 1;
            state.shut_down
        };

        let id = handle.id();
        match outcome {
            ReleaseOutcome::Clean => {
                let grace = self.inner.config.shutdown_grace;
                tokio::spawn(async move {
                    handle.shutdown_graceful(grace).await;
                });
            }
            ReleaseOutcome::Violation => {
                tracing::warn!(runner = id, "destroying runner after violation");
                handle.force_kill();
            }
        }

        if !shut_down {
            self.spawn_replenish();
        }
    }

    /// Stop all idle runners and refuse further acquires. Idempotent.
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.inner.state.lock().await;
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.live -= state.idle.len();
            std::mem::take(&mut state.idle)
        };

        for handle in handles {
            handle.shutdown_graceful(self.inner.config.shutdown_grace).await;
        }
    }

    /// Current number of pre-warmed runners.
    pub async fn idle_count(&self) -> usize {
        self.inner.state.lock().await.idle.len()
    }

    fn spawn_replenish(&self) {
        let inner = self.inner.clone();
        tokio::spawn(replenish(inner));
    }
}

/// Top the warm set up to the target, one spawn at a time.
async fn replenish(inner: Arc<PoolInner>) {
    loop {
        {
            let mut state = inner.state.lock().await;
            if state.shut_down
                || state.idle.len() >= inner.config.warm_target
                || state.live >= inner.config.max_runners
            {
                return;
            }
            state.live += 1;
        }

        match inner.factory.spawn().await {
            Ok(handle) => {
                let mut state = inner.state.lock().await;
                if state.shut_down {
                    state.live -= 1;
                    drop(state);
                    handle.force_kill();
                    return;
                }
                state.idle.push(handle);
            }
            Err(e) => {
                inner.state.lock().await.live -= 1;
                tracing::warn!(error = %e, "failed to pre-warm runner");
                return;
            }
        }
    }
}
