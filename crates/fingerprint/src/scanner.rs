//! Probe-driven service scanner

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

use netra_common::{Exchange, Finger, Fingerprinter, ScanOptions, Target, Transport};

use crate::probe::Probe;
use crate::registry::ProbeRegistry;

/// Walks the dispatch list for a port, exchanging each probe's payload with
/// the target until a rule (or a fallback probe's rule) matches.
///
/// Holds the registry read-only, so one scanner can serve any number of
/// concurrent scans.
pub struct ServiceScanner {
    registry: Arc<ProbeRegistry>,
    transport: Arc<dyn Transport>,
    options: ScanOptions,
}

impl ServiceScanner {
    pub fn new(registry: Arc<ProbeRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            options: ScanOptions::default(),
        }
    }

    /// Set exclude and rarity handling.
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Probes to try on `port`, in dispatch order, after the optional
    /// rarity filter. Probes without a rarity are always kept.
    pub fn candidates(&self, port: u16) -> Vec<&Probe> {
        let threshold = self.options.rarity_threshold;
        self.registry
            .dispatch(port)
            .iter()
            .filter_map(|name| self.registry.probe(name))
            .filter(|probe| match (threshold, probe.rarity()) {
                (Some(max), Some(rarity)) => rarity <= max,
                _ => true,
            })
            .collect()
    }

    /// Match a captured response against `probe`'s rules, then against the
    /// rules of each fallback probe. The Finger names whichever probe owned
    /// the matching rule.
    pub fn match_response(&self, probe: &Probe, response: &[u8]) -> Option<Finger> {
        if let Some(finger) = probe.match_response(response) {
            return Some(finger);
        }

        for name in probe.fallback() {
            match self.registry.probe(name) {
                Some(fallback) => {
                    if let Some(finger) = fallback.match_response(response) {
                        debug!("{} matched through fallback {}", probe.name(), name);
                        return Some(finger);
                    }
                }
                None => trace!("{}: fallback {} is not loaded", probe.name(), name),
            }
        }
        None
    }

    /// Identify the service on `host:port`, `None` when nothing matched.
    pub async fn scan(&self, host: &str, port: u16) -> Option<Finger> {
        self.scan_target(&Target::new(host, port)).await
    }

    #[instrument(skip(self), fields(target = %target))]
    pub async fn scan_target(&self, target: &Target) -> Option<Finger> {
        if self.options.honor_exclude && self.registry.is_excluded(target.port) {
            debug!("port {} is excluded, not probing", target.port);
            return None;
        }

        let candidates = self.candidates(target.port);
        if candidates.is_empty() {
            debug!("no probes dispatched for port {}", target.port);
            return None;
        }

        for probe in candidates {
            debug!(rarity = ?probe.rarity(), "sending probe {}", probe.name());
            let request = Exchange {
                protocol: probe.protocol(),
                address: &target.addr,
                payload: probe.payload(),
                total_wait: probe.total_wait(),
                tcp_wrapped: probe.tcp_wrapped(),
            };

            let response = match self.transport.exchange(&request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("probe {} failed: {}", probe.name(), e);
                    continue;
                }
            };

            if let Some(finger) = self.match_response(probe, &response) {
                debug!("identified {} via {}", finger.service, finger.probe);
                return Some(finger);
            }
            trace!("probe {}: {} bytes, no rule matched", probe.name(), response.len());
        }
        None
    }
}

#[async_trait]
impl Fingerprinter for ServiceScanner {
    async fn fingerprint(&self, target: &Target) -> Option<Finger> {
        self.scan_target(target).await
    }

    fn name(&self) -> &str {
        "probe scanner"
    }

    fn probe_count(&self) -> usize {
        self.registry.len()
    }
}
