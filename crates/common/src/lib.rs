//! Netra Common - Shared types and traits
//!
//! This crate provides the types, traits and error definitions used across
//! the Netra workspace: the fingerprint engine, the network transport, the
//! orchestrator and the CLI.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{NetraError, NetraResult};
pub use traits::{Fingerprinter, Transport};
pub use types::{Exchange, Finger, Protocol, ScanJob, ScanOptions, ScanRecord, Target};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
