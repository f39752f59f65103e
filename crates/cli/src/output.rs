//! Output formatting for scan results

use anyhow::Result;
use serde_json::json;
use std::time::Duration;

use netra_common::ScanRecord;
use netra_fingerprint::ProbeRegistry;

/// Print scan results in the specified format
pub fn print_results(records: &[ScanRecord], format: &str, scan_duration: Duration) -> Result<()> {
    match format.trim().to_lowercase().as_str() {
        "json" => println!("{}", render_json(records, scan_duration)?),
        "csv" => print!("{}", render_csv(records)),
        _ => print_table(records, scan_duration),
    }
    Ok(())
}

fn print_table(records: &[ScanRecord], scan_duration: Duration) {
    if records.is_empty() {
        println!("\nNo results to display.\n");
        return;
    }

    println!("\n{:-<96}", "");
    println!("{:<28} {:<16} {:<14} {:<36}", "TARGET", "SERVICE", "PROBE", "VERSION");
    println!("{:-<96}", "");

    let mut identified = 0;
    for record in records {
        let Some(finger) = &record.finger else {
            continue;
        };
        identified += 1;
        let service = if finger.soft {
            format!("{}?", finger.service)
        } else {
            finger.service.clone()
        };
        println!(
            "{:<28} {:<16} {:<14} {:<36}",
            record.target.addr,
            service,
            finger.probe,
            truncate(&finger.version_line(), 36)
        );
    }

    println!("{:-<96}", "");
    println!("\nSummary:");
    println!("  Total scanned: {}", records.len());
    println!("  Identified: {}", identified);
    println!("  Unidentified: {}", records.len() - identified);
    println!("  Scan duration: {}", format_duration(scan_duration));
    println!();
}

fn render_json(records: &[ScanRecord], scan_duration: Duration) -> Result<String> {
    let results: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "target": r.target.addr,
                "host": r.target.host,
                "port": r.target.port,
                "elapsed_ms": r.elapsed.as_millis() as u64,
                "finger": r.finger,
            })
        })
        .collect();

    let output = json!({
        "scan_info": {
            "duration_seconds": scan_duration.as_secs_f64(),
            "duration_formatted": format_duration(scan_duration),
            "total_scanned": records.len(),
            "identified": records.iter().filter(|r| r.is_identified()).count(),
        },
        "results": results,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

fn render_csv(records: &[ScanRecord]) -> String {
    let mut out = String::from("host,port,service,probe,product,version,info,soft,elapsed_ms\n");
    for record in records {
        let finger = record.finger.as_ref();
        let field = |f: Option<&String>| csv_quote(f.map(String::as_str).unwrap_or(""));
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            record.target.host,
            record.target.port,
            csv_quote(finger.map(|f| f.service.as_str()).unwrap_or("")),
            csv_quote(finger.map(|f| f.probe.as_str()).unwrap_or("")),
            field(finger.and_then(|f| f.product.as_ref())),
            field(finger.and_then(|f| f.version.as_ref())),
            field(finger.and_then(|f| f.info.as_ref())),
            finger.map_or(false, |f| f.soft),
            record.elapsed.as_millis()
        ));
    }
    out
}

fn csv_quote(value: &str) -> String {
    let escaped = value.replace('"', "\"\"").replace(['\r', '\n'], " ");
    format!("\"{}\"", escaped)
}

/// Every loaded probe in declaration order.
pub fn print_probes(registry: &ProbeRegistry) {
    println!("{:<22} {:<6} {:<7} {:<7} {:<6} {}", "PROBE", "PROTO", "RARITY", "PORTS", "RULES", "FALLBACK");
    for probe in registry.probes() {
        let ports = if probe.is_catch_all() {
            "all".to_string()
        } else {
            (probe.ports().len() + probe.ssl_ports().len()).to_string()
        };
        println!(
            "{:<22} {:<6} {:<7} {:<7} {:<6} {}",
            probe.name(),
            probe.protocol(),
            probe.rarity().map_or_else(|| "-".to_string(), |r| r.to_string()),
            ports,
            probe.rules().len(),
            probe.fallback().join(",")
        );
    }
    println!("\n{} probe(s), {} excluded port(s)", registry.len(), registry.exclude().len());
}

/// The ordered probe list a scan of `port` walks.
pub fn print_dispatch(registry: &ProbeRegistry, port: u16) {
    if registry.is_excluded(port) {
        println!("Port {} is excluded; scans skip it unless --no-exclude is given.", port);
    }
    let names = registry.dispatch(port);
    if names.is_empty() {
        println!("No probes apply to port {}.", port);
        return;
    }
    for (idx, name) in names.iter().enumerate() {
        let rarity = registry
            .probe(name)
            .and_then(|p| p.rarity())
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        println!("{:>3}. {:<22} rarity {}", idx + 1, name, rarity);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
