use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport connection failed: {0}")]
    ConnectionFailed(String),
    #[error("chat transport is not connected")]
    NotConnected,
    #[error("chat transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chat transport TLS error: {0}")]
    Tls(String),
}

/// One received line: `(time, sender, channel, line)` per spec.md §4.6.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub at: DateTime<Utc>,
    pub sender: String,
    pub channel: String,
    pub line: String,
}

/// A line-oriented full-duplex channel with channels-as-topics. The
/// authoritative source for every economic transition is always the
/// marketplace, never this transport; agents must tolerate chat failures
/// without impairing their core loop (spec.md §4.6).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&mut self) -> Result<(), ChatError>;

    async fn join(&mut self, channel: &str) -> Result<(), ChatError>;

    /// Non-blocking up to a small per-channel outbox; drops (incrementing a
    /// metric) rather than blocking the caller's tick.
    async fn send(&self, channel: &str, line: &str) -> Result<(), ChatError>;

    /// Waits up to `deadline` for the next line on a joined channel.
    /// Returns `Ok(None)` on deadline expiry, never an error for that case.
    async fn recv(&mut self, deadline: Duration) -> Result<Option<ChatMessage>, ChatError>;
}
