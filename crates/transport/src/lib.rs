//! Netra Transport - network I/O for the fingerprint engine
//!
//! [`NetTransport`] performs the connect/send/read exchange behind the
//! engine's `Transport` trait. [`HostDiscovery`] filters out hosts that do
//! not answer before any probe is sent.

mod discovery;
mod net;

pub use discovery::{HostDiscovery, DISCOVERY_CONCURRENCY, SWEEP_PORTS};
pub use net::{NetTransport, MAX_RESPONSE};
