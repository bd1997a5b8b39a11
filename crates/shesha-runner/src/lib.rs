//! shesha-runner: the in-sandbox side of the RLM runtime.
//!
//! A runner is a long-lived process that evaluates model-written code in a
//! persistent namespace and talks to the controller over line-framed JSON
//! on stdin/stdout:
//!
//! - **Language**: a small, typed scripting language (assignments,
//!   expressions, string/list operations) with the document corpus exposed
//!   as a read-only `context` map
//! - **Host calls**: `llm_query(instruction, content)` suspends evaluation
//!   and round-trips through the controller; `FINAL(value)` terminates the
//!   current execute with a final answer
//! - **Session**: the frame loop (`init` → `execute`* → `shutdown`)
//!
//! The evaluator has no filesystem or network access; documents arriving
//! in the `init` frame are the only external data. One runner serves at
//! most one query and is destroyed afterwards.

pub mod interp;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod value;

pub use interp::{ExecOutput, Interpreter, ReplHost};
pub use session::{RunnerSession, SessionError};
pub use value::Value;
