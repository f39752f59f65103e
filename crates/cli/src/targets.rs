//! Target expansion and port parsing
//!
//! Supported target tokens, comma separated:
//! - single address: "1.2.3.4" or "::1"
//! - CIDR: "192.168.1.0/24"
//! - IPv4 range: "192.168.1.1-192.168.1.10"
//! - hostname: "example.com"

use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::lookup_host;
use tracing::warn;

use netra_fingerprint::PortSet;

/// CIDR blocks larger than this are refused unless overridden.
pub const MAX_CIDR_HOSTS: u128 = 4096;
pub const ALLOW_LARGE_CIDR_ENV: &str = "NETRA_ALLOW_LARGE_CIDR";

/// Expand a target string into unique addresses, in first-seen order.
pub async fn resolve_targets(targets: &str) -> Result<Vec<IpAddr>> {
    if targets.trim().is_empty() {
        bail!("No targets specified");
    }
    let allow_large = std::env::var(ALLOW_LARGE_CIDR_ENV).map_or(false, |v| v == "1");

    let mut ips: Vec<IpAddr> = Vec::new();

    for token in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Ok(net) = token.parse::<IpNet>() {
            for ip in expand_cidr(net, allow_large)? {
                push_unique(&mut ips, ip);
            }
            continue;
        }

        if let Ok(ip) = token.parse::<IpAddr>() {
            push_unique(&mut ips, ip);
            continue;
        }

        let looks_like_range = token
            .split_once('-')
            .map_or(false, |(start, _)| start.trim().parse::<Ipv4Addr>().is_ok());
        if looks_like_range {
            for ip in parse_ip_range(token)? {
                push_unique(&mut ips, ip);
            }
            continue;
        }

        match lookup_host((token, 0)).await {
            Ok(addrs) => {
                for addr in addrs {
                    push_unique(&mut ips, addr.ip());
                }
            }
            Err(e) => warn!("could not resolve {}: {}", token, e),
        }
    }

    if ips.is_empty() {
        bail!("No valid addresses found in targets");
    }
    Ok(ips)
}

fn push_unique(ips: &mut Vec<IpAddr>, ip: IpAddr) {
    if !ips.contains(&ip) {
        ips.push(ip);
    }
}

fn expand_cidr(net: IpNet, allow_large: bool) -> Result<Vec<IpAddr>> {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    let hosts = 1u128.checked_shl(host_bits).unwrap_or(u128::MAX);
    if hosts > MAX_CIDR_HOSTS && !allow_large {
        bail!(
            "CIDR {} expands to {} hosts which exceeds the limit of {}. Set {}=1 to override.",
            net,
            hosts,
            MAX_CIDR_HOSTS,
            ALLOW_LARGE_CIDR_ENV
        );
    }
    Ok(net.hosts().collect())
}

fn parse_ip_range(range: &str) -> Result<Vec<IpAddr>> {
    let (start, end) = range
        .split_once('-')
        .with_context(|| format!("Invalid IP range: {}", range))?;
    let start: Ipv4Addr = start.trim().parse().with_context(|| format!("Invalid start IP: {}", start))?;
    let end: Ipv4Addr = end.trim().parse().with_context(|| format!("Invalid end IP: {}", end))?;

    let (start, end) = (u32::from(start), u32::from(end));
    if start > end {
        bail!("Invalid IP range: start > end");
    }
    if u128::from(end - start) >= MAX_CIDR_HOSTS {
        bail!("IP range {} exceeds the limit of {} hosts", range, MAX_CIDR_HOSTS);
    }
    Ok((start..=end).map(|v| IpAddr::V4(Ipv4Addr::from(v))).collect())
}

/// Parse a port list like "80,443,1000-1010" into sorted unique ports.
pub fn parse_ports(ports: &str) -> Result<Vec<u16>> {
    let set = PortSet::parse(ports).with_context(|| format!("Invalid port list '{}'", ports))?;
    Ok(set.iter().collect())
}
