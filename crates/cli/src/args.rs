use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use netra_common::ScanOptions;

#[derive(Parser)]
#[command(name = "netra")]
#[command(version)]
#[command(about = "Probe-driven network service fingerprinting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the services listening on the given targets
    Scan(ScanArgs),

    /// List the loaded probes, or the probes dispatched for one port
    Probes {
        /// Show the ordered probe list for this port
        #[arg(long)]
        port: Option<u16>,

        /// Probe database file (defaults to the embedded one)
        #[arg(long)]
        probes: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Targets: IP, hostname, CIDR or a.b.c.d-e.f.g.h range, comma separated
    #[arg(short = 't', long, required = true)]
    pub targets: String,

    /// Ports to fingerprint. Examples: 80,443 or 1-1024 or 22,80-90
    #[arg(short, long, default_value = "80")]
    pub ports: String,

    /// Max concurrent scans (overrides the preset)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Scans started per second, 0 for unlimited
    #[arg(short = 'r', long, default_value = "0")]
    pub rate_limit: u32,

    /// Default total wait per probe in milliseconds (overrides the preset).
    /// Probes that declare totalwaitms keep their own wait; see --max-wait
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Cap on every probe's wait in milliseconds, declared waits included
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Only send probes with rarity at or below this value
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=9))]
    pub rarity: Option<u8>,

    /// Probe database file (defaults to the embedded one)
    #[arg(long)]
    pub probes: Option<PathBuf>,

    /// Drop hosts that answer neither ICMP echo nor common TCP ports
    #[arg(long)]
    pub discover: bool,

    /// Probe ports listed in Exclude directives too
    #[arg(long)]
    pub no_exclude: bool,

    /// Output format: text, json, csv
    #[arg(short, long, default_value = "text", value_parser = ["text", "table", "json", "csv"])]
    pub output_format: String,

    /// Preset: fast, balanced, accurate
    #[arg(long, default_value = "balanced", value_parser = ["fast", "balanced", "accurate"])]
    pub preset: String,
}

impl ScanArgs {
    /// Preset defaults with explicit flags layered on top.
    pub fn scan_options(&self) -> ScanOptions {
        let mut options = match self.preset.as_str() {
            "fast" => ScanOptions::fast(),
            "accurate" => ScanOptions::accurate(),
            _ => ScanOptions::default(),
        };

        if let Some(concurrency) = self.concurrency {
            options.max_concurrency = concurrency.max(1);
        }
        if self.rate_limit > 0 {
            options.rate_limit = Some(self.rate_limit);
        }
        if let Some(ms) = self.timeout {
            options.total_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_wait {
            options.max_wait = Some(Duration::from_millis(ms));
        }
        if self.rarity.is_some() {
            options.rarity_threshold = self.rarity;
        }
        options.honor_exclude = !self.no_exclude;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_args(argv: &[&str]) -> ScanArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Scan(args) => args,
            Commands::Probes { .. } => panic!("expected scan"),
        }
    }

    #[test]
    fn balanced_defaults() {
        let args = scan_args(&["netra", "scan", "-t", "10.0.0.1"]);
        assert_eq!(args.ports, "80");
        let options = args.scan_options();
        assert_eq!(options.rarity_threshold, None);
        assert!(options.honor_exclude);
        assert_eq!(options.rate_limit, None);
        assert_eq!(options.total_wait, Duration::from_millis(5000));
        assert_eq!(options.max_wait, None);
    }

    #[test]
    fn max_wait_flag_caps_declared_waits() {
        let options = scan_args(&["netra", "scan", "-t", "10.0.0.1", "--max-wait", "750"]).scan_options();
        assert_eq!(options.max_wait, Some(Duration::from_millis(750)));

        let fast = scan_args(&["netra", "scan", "-t", "10.0.0.1", "--preset", "fast"]).scan_options();
        assert_eq!(fast.max_wait, Some(Duration::from_millis(3000)));
    }

    #[test]
    fn flags_override_preset() {
        let args = scan_args(&[
            "netra", "scan", "-t", "10.0.0.1", "--preset", "fast", "--rarity", "7", "--timeout", "900", "-c", "8",
            "-r", "50", "--no-exclude",
        ]);
        let options = args.scan_options();
        assert_eq!(options.rarity_threshold, Some(7));
        assert_eq!(options.total_wait, Duration::from_millis(900));
        assert_eq!(options.tcp_wrapped, Duration::from_millis(1000));
        assert_eq!(options.max_concurrency, 8);
        assert_eq!(options.rate_limit, Some(50));
        assert!(!options.honor_exclude);
    }

    #[test]
    fn rejects_out_of_range_rarity() {
        assert!(Cli::try_parse_from(["netra", "scan", "-t", "h", "--rarity", "0"]).is_err());
        assert!(Cli::try_parse_from(["netra", "scan", "-t", "h", "--rarity", "10"]).is_err());
    }

    #[test]
    fn probes_subcommand() {
        let cli = Cli::try_parse_from(["netra", "-v", "probes", "--port", "22"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Commands::Probes { port: Some(22), probes: None }));
    }
}
