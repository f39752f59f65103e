//! Core data types shared by the engine, the transport and the CLI.
//!
//! Hot-path structs keep `pub` fields so the scanner and the output layer
//! can read them without accessor overhead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::NetraError;

/// Transport a probe is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    TCP,
    UDP,
}

impl Protocol {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::TCP => "tcp",
            Protocol::UDP => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = NetraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Protocol::TCP)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Protocol::UDP)
        } else {
            Err(NetraError::Parse(format!("unknown protocol '{}'", s)))
        }
    }
}

/// Single scan target. `addr` is the composed `host:port` string handed to
/// the transport; IPv6 literals are bracketed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub addr: String,
}

impl Target {
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        let host = host.into();
        let addr = if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self { host, port, addr }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// Identification produced by a successful match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Finger {
    /// Probe whose rule matched (the fallback probe when matched through a fallback).
    pub probe: String,
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub info: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpe: Vec<String>,
    /// Produced by a `softmatch` rule.
    pub soft: bool,
}

impl Finger {
    #[inline]
    #[must_use]
    pub fn new<P: Into<String>, S: Into<String>>(probe: P, service: S) -> Self {
        Self {
            probe: probe.into(),
            service: service.into(),
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_product(mut self, product: String) -> Self {
        self.product = Some(product);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: String) -> Self {
        self.version = Some(version);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_soft(mut self, soft: bool) -> Self {
        self.soft = soft;
        self
    }

    /// "product version (info)", skipping whatever is missing.
    #[must_use]
    pub fn version_line(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(p) = self.product.as_deref() {
            parts.push(p);
        }
        if let Some(v) = self.version.as_deref() {
            parts.push(v);
        }
        let mut line = parts.join(" ");
        if let Some(i) = self.info.as_deref() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push('(');
            line.push_str(i);
            line.push(')');
        }
        line
    }
}

/// One network exchange requested by the scanner. Missing timeouts mean
/// "use the transport default".
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    pub protocol: Protocol,
    pub address: &'a str,
    pub payload: &'a [u8],
    pub total_wait: Option<Duration>,
    pub tcp_wrapped: Option<Duration>,
}

/// Engine, transport and orchestration tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Skip probes rarer than this. `None` runs every dispatched probe.
    pub rarity_threshold: Option<u8>,
    /// Refuse ports listed by `Exclude` directives.
    pub honor_exclude: bool,
    pub total_wait: Duration,
    pub tcp_wrapped: Duration,
    /// Upper bound on any single exchange, including waits a probe declares
    /// itself with `totalwaitms`.
    pub max_wait: Option<Duration>,
    pub max_concurrency: usize,
    pub rate_limit: Option<u32>, // scans per second
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            rarity_threshold: None,
            honor_exclude: true,
            total_wait: Duration::from_millis(5000),
            tcp_wrapped: Duration::from_millis(2000),
            max_wait: None,
            max_concurrency: 256,
            rate_limit: None,
        }
    }
}

impl ScanOptions {
    /// Fast preset: short waits, only common probes.
    #[inline]
    #[must_use]
    pub fn fast() -> Self {
        Self {
            rarity_threshold: Some(3),
            total_wait: Duration::from_millis(2000),
            tcp_wrapped: Duration::from_millis(1000),
            max_wait: Some(Duration::from_millis(3000)),
            max_concurrency: 1024,
            ..Self::default()
        }
    }

    /// Accurate preset: every probe, generous waits.
    #[inline]
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            rarity_threshold: None,
            total_wait: Duration::from_millis(8000),
            tcp_wrapped: Duration::from_millis(3000),
            max_concurrency: 64,
            ..Self::default()
        }
    }
}

/// Scan job: the targets of one run plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub targets: Vec<Target>,
    pub created_at: SystemTime,
}

impl ScanJob {
    #[inline]
    #[must_use]
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            id: Uuid::new_v4(),
            targets,
            created_at: SystemTime::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

/// Outcome of fingerprinting one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub target: Target,
    pub finger: Option<Finger>,
    pub elapsed: Duration,
}

impl ScanRecord {
    #[inline]
    #[must_use]
    pub fn new(target: Target, finger: Option<Finger>, elapsed: Duration) -> Self {
        Self { target, finger, elapsed }
    }

    #[inline]
    #[must_use]
    pub fn is_identified(&self) -> bool {
        self.finger.is_some()
    }
}
