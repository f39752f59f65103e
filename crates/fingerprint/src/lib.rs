//! Netra Fingerprint - probe-driven service identification
//!
//! The engine reads a line-oriented probe database (an nmap-service-probes
//! compatible subset), compiles every probe and its match rules once, and
//! precomputes which probes apply to each port. Scanning a target walks
//! that per-port list, sending each probe's payload through a
//! [`Transport`] and matching the raw reply against the probe's rules and
//! then its fallback probes' rules.
//!
//! The process-wide registry is built at most once by [`init`]; scanners
//! created afterwards by [`new`] share it read-only.

mod parser;
mod port_set;
mod probe;
mod registry;
mod rule;
mod scanner;

use once_cell::sync::OnceCell;
use std::sync::Arc;

use netra_common::{NetraError, NetraResult, Transport};

pub use parser::{parse, BACKQUOTE_MARKER};
pub use port_set::PortSet;
pub use probe::Probe;
pub use registry::ProbeRegistry;
pub use rule::{Field, MatchRule, RuleKind};
pub use scanner::ServiceScanner;

/// Probe database compiled into the binary.
pub const SERVICE_PROBES: &str = include_str!("../data/service-probes");

static REGISTRY: OnceCell<Arc<ProbeRegistry>> = OnceCell::new();

/// Build the global registry from the embedded database.
///
/// Only the first successful call parses; later calls (including
/// concurrent ones) return the same registry.
pub fn init() -> NetraResult<Arc<ProbeRegistry>> {
    REGISTRY
        .get_or_try_init(|| ProbeRegistry::embedded().map(Arc::new))
        .cloned()
}

/// The global registry, if [`init`] has completed.
pub fn registry() -> Option<Arc<ProbeRegistry>> {
    REGISTRY.get().cloned()
}

/// Scanner over the global registry.
pub fn new(transport: Arc<dyn Transport>) -> NetraResult<ServiceScanner> {
    let registry = registry().ok_or(NetraError::NotInitialized)?;
    Ok(ServiceScanner::new(registry, transport))
}
