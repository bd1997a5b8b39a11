//! shesha-protocol: sandbox wire protocol
//!
//! This crate defines the line-framed JSON protocol spoken between the
//! controller (host) and a sandboxed runner process:
//!
//! - **Frames**: typed request/response messages for both directions
//! - **Framed transport**: a reader/writer pair that enforces hard limits
//!   on line length, buffered bytes, and read duration
//!
//! The protocol is half-duplex per `execute` call: the controller sends one
//! frame and drains runner frames until a `result` arrives, answering any
//! `llm_query` detour in between.

pub mod framed;
pub mod frames;

pub use framed::{FramedReader, FramedWriter, ProtocolError, WireLimits};
pub use frames::{ControllerFrame, DocumentPayload, ExecutionResult, RunnerFrame};
