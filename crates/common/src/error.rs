//! Error types for Netra
//!
//! Load-time problems (`Config`, `DuplicateProbe`) are fatal. Everything a
//! scan can run into is reported per attempt and never aborts the scan.

use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum NetraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate probe name: {0}")]
    DuplicateProbe(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("tcpwrapped: peer closed the connection without data")]
    TcpWrapped,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Probe registry not initialized")]
    NotInitialized,
}

impl NetraError {
    /// True for errors that only invalidate a single probe attempt.
    #[inline]
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            NetraError::Network(_) | NetraError::Io(_) | NetraError::Timeout(_) | NetraError::TcpWrapped
        )
    }
}

/// Result type alias for Netra operations
pub type NetraResult<T> = Result<T, NetraError>;
