//! Command-line arguments. Every flag overrides the config file value.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "host-monitor", version, about)]
pub struct Args {
    /// Comma-separated hosts to monitor, e.g. "google.com,github.com"
    #[arg(long)]
    pub hosts: Option<String>,

    /// Seconds to sleep between probe cycles
    #[arg(long)]
    pub interval: Option<u64>,

    /// TCP port used when ICMP echo fails
    #[arg(long = "tcpport")]
    pub tcp_port: Option<u16>,

    /// Samples retained per host for the rolling average
    #[arg(long)]
    pub history: Option<usize>,

    /// Skip ICMP entirely and probe with TCP connect only
    #[arg(long)]
    pub no_icmp: bool,

    /// Address the observer server binds to
    #[arg(long)]
    pub bind: Option<String>,

    /// Port the observer server listens on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to a JSON config file (default: <config dir>/HostMonitor/config.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
