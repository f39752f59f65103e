use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use netra_common::{ScanJob, Target};
use netra_fingerprint::{ProbeRegistry, ServiceScanner};
use netra_orchestrator::{Orchestrator, DEFAULT_FINGERPRINTER};
use netra_transport::{HostDiscovery, NetTransport};

use crate::args::ScanArgs;
use crate::output::{print_dispatch, print_probes, print_results};
use crate::targets::{parse_ports, resolve_targets};

pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let options = args.scan_options();
    info!("Targets: {}", args.targets);
    info!("Ports: {}", args.ports);
    info!(
        "Preset: {} (concurrency {}, rate limit {:?}/s, rarity {:?})",
        args.preset, options.max_concurrency, options.rate_limit, options.rarity_threshold
    );

    let registry = load_registry(args.probes.as_deref()).await?;
    let mut hosts = resolve_targets(&args.targets).await?;
    let ports = parse_ports(&args.ports)?;

    if args.discover {
        let before = hosts.len();
        hosts = HostDiscovery::new().filter_alive(hosts).await;
        info!("Host discovery: {}/{} host(s) up", hosts.len(), before);
        if hosts.is_empty() {
            warn!("No live hosts found, nothing to scan");
        }
    }

    let targets: Vec<Target> = hosts
        .iter()
        .flat_map(|ip| ports.iter().map(move |port| Target::new(ip.to_string(), *port)))
        .collect();
    info!(
        "Total scan targets: {} ({} host(s) x {} port(s))",
        targets.len(),
        hosts.len(),
        ports.len()
    );

    let transport = Arc::new(NetTransport::from_options(&options));
    let scanner = ServiceScanner::new(registry, transport).with_options(options.clone());

    let mut orchestrator = Orchestrator::from_options(&options);
    orchestrator.add_fingerprinter(DEFAULT_FINGERPRINTER, Arc::new(scanner));
    orchestrator.submit_job(ScanJob::new(targets)).await;

    let scan_start = Instant::now();
    let records = orchestrator.run(None).await?;
    print_results(&records, &args.output_format, scan_start.elapsed())?;
    Ok(())
}

pub async fn list_probes(port: Option<u16>, probes: Option<&Path>) -> Result<()> {
    let registry = load_registry(probes).await?;
    match port {
        Some(port) => print_dispatch(&registry, port),
        None => print_probes(&registry),
    }
    Ok(())
}

/// The embedded database through the process-wide registry, or a file
/// parsed on its own.
async fn load_registry(path: Option<&Path>) -> Result<Arc<ProbeRegistry>> {
    let Some(path) = path else {
        return netra_fingerprint::init().context("Embedded probe database failed to load");
    };

    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read probe database {}", path.display()))?;
    let registry =
        ProbeRegistry::parse(&text).with_context(|| format!("Invalid probe database {}", path.display()))?;
    info!("Loaded {} probe(s) from {}", registry.len(), path.display());
    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_embedded_registry() {
        let registry = load_registry(None).await.unwrap();
        assert!(registry.probe("NULL").is_some());
    }

    #[tokio::test]
    async fn loads_registry_from_file() {
        let path = std::env::temp_dir().join(format!("netra-probes-{}", std::process::id()));
        tokio::fs::write(&path, "Probe TCP Custom q|hi|\nports 4000\nmatch x m|^x|\n")
            .await
            .unwrap();

        let registry = load_registry(Some(path.as_path())).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(4000).len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_or_invalid_file_is_an_error() {
        let missing = std::env::temp_dir().join("netra-no-such-probes-file");
        assert!(load_registry(Some(missing.as_path())).await.is_err());

        let path = std::env::temp_dir().join(format!("netra-bad-probes-{}", std::process::id()));
        tokio::fs::write(&path, "Exclude nonsense\n").await.unwrap();
        assert!(load_registry(Some(path.as_path())).await.is_err());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
