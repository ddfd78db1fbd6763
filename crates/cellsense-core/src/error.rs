//! Error types shared across the core
//!
//! Nothing in here is fatal. Every variant is handed back to the driving
//! loop, which keeps running and retries on a later iteration.

use thiserror_no_std::Error;

/// Failures of the sample buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer reached capacity. It has to be drained (uploaded and
    /// consumed) before it accepts more samples.
    #[error("Sample buffer is full")]
    Full,
    #[error("Invalid chunk count {requested} (must be 1..={max})")]
    InvalidChunkCount { requested: usize, max: usize },
    /// A group of samples does not fit in a single chunk.
    #[error("Chunk {chunk} exceeds the chunk capacity")]
    ChunkOverflow { chunk: usize },
}

/// Failures of the cellular link and the upload path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// A connect attempt came before the minimum retry interval elapsed.
    #[error("Connection attempt rate limited")]
    RateLimited,
    #[error("Network attach failed")]
    AttachNetwork,
    #[error("Data bearer attach failed")]
    AttachBearer,
    /// Deadline exceeded while connected, or an expected response never
    /// arrived.
    #[error("Timed out")]
    Timeout,
    #[error("Connecting to the upload endpoint failed")]
    TransportConnect,
    #[error("Writing the request failed")]
    TransportWrite,
    #[error("Request path exceeds its buffer")]
    RequestTooLong,
}

/// Problems found by [`Config::validate`](crate::config::Config::validate).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Server host is empty")]
    MissingHost,
    #[error("Write API key is empty")]
    MissingWriteKey,
    #[error("Chunks per upload must be 1..={max}, got {got}")]
    InvalidChunkCount { got: usize, max: usize },
    #[error("Max retry attempts must be at least 1")]
    InvalidRetryAttempts,
    #[error("Field number {0} is outside 1..=8")]
    InvalidField(u8),
}
