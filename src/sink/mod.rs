pub mod cloudwatch;
pub mod memory;

use crate::pipeline::batch::LogBatch;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use cloudwatch::CloudWatchSink;
pub use memory::MemorySink;

/// Destination of a line stream: a named stream inside a named group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub group: String,
    pub stream: String,
}

impl StreamId {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

/// Classified delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Expected to resolve on retry (throttling, network failure)
    #[error("transient sink error: {0}")]
    Transient(String),

    /// Will not resolve on retry (missing destination, rejected credentials)
    #[error("permanent sink error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Remote append-only log destination.
///
/// Implementations are shared between pipelines and must tolerate concurrent
/// `submit` calls for different streams.
#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    /// Append `batch` to `stream`. Lines arrive in sequence order and a batch
    /// that was already acknowledged may be submitted again.
    async fn submit(&self, stream: &StreamId, batch: &LogBatch) -> Result<(), SinkError>;
}
