use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::aggregator::DEFAULT_HISTORY_SIZE;
use crate::args::Args;
use crate::dns_cache::DEFAULT_DNS_TTL_SECS;
use crate::error::ConfigError;
use crate::probe::{DEFAULT_ICMP_TIMEOUT_MS, DEFAULT_TCP_PORT, DEFAULT_TCP_TIMEOUT_MS, ProbeSettings};
use crate::scheduler::{DEFAULT_INTERVAL_SECS, DEFAULT_PUBLISH_TIMEOUT_MS};

pub const DEFAULT_HOSTS: &str = "google.com,github.com";

/// Splits a comma-separated host list, trimming entries and dropping empties
/// and repeats. The first occurrence keeps its position.
pub fn parse_hosts(list: &str) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for host in list.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        if !hosts.iter().any(|known| known == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

/// `hosts` in the config file: either `"a,b"` or `["a", "b"]`.
fn deserialize_hosts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match HostList::deserialize(deserializer)? {
        HostList::Joined(list) => parse_hosts(&list),
        HostList::List(hosts) => parse_hosts(&hosts.join(",")),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "deserialize_hosts")]
    pub hosts: Vec<String>,
    /// Seconds between the end of one publish and the next probe cycle.
    pub interval: u64,
    #[serde(rename = "tcpport")]
    pub tcp_port: u16,
    pub history: usize,
    pub icmp: bool,
    pub icmp_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub dns_ttl_secs: u64,
    pub bind: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hosts: parse_hosts(DEFAULT_HOSTS),
            interval: DEFAULT_INTERVAL_SECS,
            tcp_port: DEFAULT_TCP_PORT,
            history: DEFAULT_HISTORY_SIZE,
            icmp: true,
            icmp_timeout_ms: DEFAULT_ICMP_TIMEOUT_MS,
            tcp_timeout_ms: DEFAULT_TCP_TIMEOUT_MS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            dns_ttl_secs: DEFAULT_DNS_TTL_SECS,
            bind: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl AppConfig {
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::ConfigPathUnavailable)?;
        Ok(config_dir.join("HostMonitor").join("config.json"))
    }

    /// Reads the config file at `path`, or at the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFailed { path: path.clone(), source })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::ParseFailed { path, source })
    }

    /// File config overlaid with command-line flags, validated.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, args: &Args) {
        if let Some(hosts) = &args.hosts {
            self.hosts = parse_hosts(hosts);
        }
        if let Some(interval) = args.interval {
            self.interval = interval;
        }
        if let Some(tcp_port) = args.tcp_port {
            self.tcp_port = tcp_port;
        }
        if let Some(history) = args.history {
            self.history = history;
        }
        if args.no_icmp {
            self.icmp = false;
        }
        if let Some(bind) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
    }

    /// Normalizes the host list and rejects values the engine cannot run with.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.hosts = parse_hosts(&self.hosts.join(","));
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        if self.history == 0 {
            return Err(ConfigError::InvalidHistory);
        }
        if self.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        for (name, value) in [
            ("icmp", self.icmp_timeout_ms),
            ("tcp", self.tcp_timeout_ms),
            ("publish", self.publish_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTimeout(name));
            }
        }
        Ok(())
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            icmp_enabled: self.icmp,
            icmp_timeout: Duration::from_millis(self.icmp_timeout_ms),
            tcp_timeout: Duration::from_millis(self.tcp_timeout_ms),
            tcp_port: self.tcp_port,
            dns_ttl: Duration::from_secs(self.dns_ttl_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: IpAddr = self.bind.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
