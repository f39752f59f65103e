//! Probe registry and per-port dispatch table

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use netra_common::{NetraError, NetraResult};

use crate::parser;
use crate::port_set::PortSet;
use crate::probe::Probe;

/// All compiled probes plus the precomputed port -> probe-name dispatch table.
///
/// Built once, then read-only. Share it behind an `Arc`; `Clone` is there
/// for callers that want an independent copy.
#[derive(Clone)]
pub struct ProbeRegistry {
    probes: HashMap<Arc<str>, Probe>,
    order: Vec<Arc<str>>,
    dispatch: Vec<Vec<Arc<str>>>,
    exclude: PortSet,
}

impl ProbeRegistry {
    /// Empty registry with an empty dispatch entry for every port.
    #[must_use]
    pub fn new() -> Self {
        Self {
            probes: HashMap::new(),
            order: Vec::new(),
            dispatch: vec![Vec::new(); u16::MAX as usize + 1],
            exclude: PortSet::new(),
        }
    }

    /// Build a registry from probe-database text.
    pub fn parse(text: &str) -> NetraResult<Self> {
        parser::parse(text)
    }

    /// Build a registry from the database compiled into the binary.
    pub fn embedded() -> NetraResult<Self> {
        Self::parse(crate::SERVICE_PROBES)
    }

    /// Add a probe and index it under every port it applies to.
    ///
    /// A probe declaring neither `ports` nor `sslports` is indexed under all
    /// of 1-65535. Names must be unique.
    pub fn register(&mut self, probe: Probe) -> NetraResult<()> {
        let name: Arc<str> = Arc::from(probe.name());
        if self.probes.contains_key(&name) {
            return Err(NetraError::DuplicateProbe(name.to_string()));
        }

        let mut applicable = probe.ports().clone();
        if probe.is_catch_all() {
            applicable.fill();
        } else {
            for port in probe.ssl_ports().iter() {
                applicable.insert(port);
            }
        }
        for port in applicable.iter() {
            self.dispatch[port as usize].push(Arc::clone(&name));
        }

        self.order.push(Arc::clone(&name));
        self.probes.insert(name, probe);
        Ok(())
    }

    /// Merge an `Exclude` expression into the exclude set.
    pub fn add_exclude(&mut self, expr: &str) -> NetraResult<()> {
        self.exclude
            .load(expr)
            .map_err(|e| NetraError::Config(format!("malformed Exclude directive '{}': {}", expr.trim(), e)))
    }

    #[inline]
    #[must_use]
    pub fn probe(&self, name: &str) -> Option<&Probe> {
        self.probes.get(name)
    }

    /// Probe names in declaration order.
    #[inline]
    #[must_use]
    pub fn probe_names(&self) -> &[Arc<str>] {
        &self.order
    }

    /// Probes in declaration order.
    pub fn probes(&self) -> impl Iterator<Item = &Probe> + '_ {
        self.order.iter().filter_map(move |name| self.probes.get(name))
    }

    /// Ordered probe names applicable to `port`.
    #[inline]
    #[must_use]
    pub fn dispatch(&self, port: u16) -> &[Arc<str>] {
        &self.dispatch[port as usize]
    }

    #[inline]
    #[must_use]
    pub fn exclude(&self) -> &PortSet {
        &self.exclude
    }

    #[inline]
    #[must_use]
    pub fn is_excluded(&self, port: u16) -> bool {
        self.exclude.contains(port)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.order)
            .field("exclude", &self.exclude)
            .finish()
    }
}
