//! shesha-runner: sandboxed REPL process.
//!
//! Speaks the framed protocol on stdin/stdout; stdout is reserved for
//! frames, so diagnostics go to stderr only.

use tracing_subscriber::EnvFilter;

use shesha_runner::RunnerSession;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SHESHA_RUNNER_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let session = RunnerSession::new(tokio::io::stdin(), tokio::io::stdout());
    if let Err(e) = session.run().await {
        tracing::error!(error = %e, "runner session failed");
        std::process::exit(1);
    }
}
