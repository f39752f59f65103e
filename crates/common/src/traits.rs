//! Seams between the engine and its collaborators
//!
//! - `Transport`: the bounded connect/write/read/close capability the
//!   scanner consumes for every probe attempt
//! - `Fingerprinter`: what the orchestrator drives per target

use crate::error::NetraResult;
use crate::types::{Exchange, Finger, Target};
use async_trait::async_trait;

/// Network capability used by the scanner, one call per probe attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request.payload` to `request.address` and return the raw reply.
    ///
    /// Must not block longer than the request's total wait (or the
    /// transport default when unset).
    async fn exchange(&self, request: &Exchange<'_>) -> NetraResult<Vec<u8>>;

    /// Transport name/identifier
    fn name(&self) -> &str;
}

/// Service identification for a single target.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    /// Identify the service behind `target`, `None` when nothing matched.
    async fn fingerprint(&self, target: &Target) -> Option<Finger>;

    /// Fingerprinter name/identifier
    fn name(&self) -> &str;

    /// Number of loaded probes
    fn probe_count(&self) -> usize {
        0
    }
}
