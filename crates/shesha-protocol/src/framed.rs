//! Framed line-JSON transport with hard wire limits.
//!
//! One frame is one line of JSON terminated by `\n` (a preceding `\r` is
//! accepted and stripped). The reader enforces three limits while waiting
//! for a frame boundary:
//!
//! - `max_line_length`: a complete line longer than this is rejected
//! - `max_buffer_size`: bytes buffered without a newline may not exceed this
//! - `max_read_duration`: one `read_frame` call may not take longer than this
//!
//! Violations surface as [`ProtocolError`] and are terminal for the peer:
//! the caller is expected to destroy the connection rather than resync.

use std::time::Duration;

use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum length of a single framed line, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Default maximum bytes buffered while awaiting a frame boundary.
pub const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum wall-clock duration of a single frame read.
pub const MAX_READ_DURATION: Duration = Duration::from_secs(300);

const READ_CHUNK: usize = 8 * 1024;

/// Errors raised by the framed transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A complete line exceeded the line-length limit.
    #[error("frame line exceeds limit of {limit} bytes")]
    LineTooLong { limit: usize },

    /// Bytes kept accumulating without a newline past the buffer limit.
    #[error("frame buffer exceeds limit of {limit} bytes without a newline")]
    BufferExceeded { limit: usize },

    /// No complete frame arrived within the read deadline.
    #[error("frame read exceeded {} seconds", .timeout.as_secs())]
    ReadTimeout { timeout: Duration },

    /// The peer closed the stream mid-conversation.
    #[error("stream closed while awaiting a frame")]
    UnexpectedEof,

    /// The line was not valid UTF-8 or not a recognized JSON frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configurable wire limits.
///
/// Deployments may override the defaults but the size limits must stay
/// finite. The read deadline is optional: the controller always sets one,
/// while a runner waiting for its next command may idle indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    pub max_line_length: usize,
    pub max_buffer_size: usize,
    pub max_read_duration: Option<Duration>,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
            max_buffer_size: MAX_BUFFER_SIZE,
            max_read_duration: Some(MAX_READ_DURATION),
        }
    }
}

impl WireLimits {
    pub fn with_max_line_length(mut self, bytes: usize) -> Self {
        self.max_line_length = bytes;
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_max_read_duration(mut self, duration: Duration) -> Self {
        self.max_read_duration = Some(duration);
        self
    }

    /// Remove the per-read deadline (size limits still apply).
    pub fn without_read_deadline(mut self) -> Self {
        self.max_read_duration = None;
        self
    }
}

/// Reads framed JSON messages from an async byte stream.
pub struct FramedReader<R> {
    inner: R,
    buf: BytesMut,
    limits: WireLimits,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Create a reader with default limits.
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, WireLimits::default())
    }

    /// Create a reader with explicit limits.
    pub fn with_limits(inner: R, limits: WireLimits) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            limits,
        }
    }

    /// Read the next frame and deserialize it as `T`.
    ///
    /// The whole call is bounded by `max_read_duration`.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let line = self.read_line().await?;
        serde_json::from_str(&line).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Read one complete line, without its terminator.
    async fn read_line(&mut self) -> Result<String, ProtocolError> {
        match self.limits.max_read_duration {
            Some(deadline) => match tokio::time::timeout(deadline, self.read_line_inner()).await {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::ReadTimeout { timeout: deadline }),
            },
            None => self.read_line_inner().await,
        }
    }

    async fn read_line_inner(&mut self) -> Result<String, ProtocolError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                if line.len() > self.limits.max_line_length {
                    return Err(ProtocolError::LineTooLong {
                        limit: self.limits.max_line_length,
                    });
                }
                return String::from_utf8(line.to_vec())
                    .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {}", e)));
            }

            if self.buf.len() > self.limits.max_buffer_size {
                return Err(ProtocolError::BufferExceeded {
                    limit: self.limits.max_buffer_size,
                });
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(ProtocolError::UnexpectedEof);
            }
        }
    }

    /// Consume the reader, returning the underlying stream.
    ///
    /// Any buffered bytes past the last consumed frame are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes framed JSON messages to an async byte stream.
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize `frame` as a single JSON line and flush it.
    ///
    /// `serde_json` escapes embedded newlines, so the serialized form never
    /// contains a raw `\n` and framing stays unambiguous.
    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> Result<(), ProtocolError> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
