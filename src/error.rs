use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find config directory")]
    ConfigPathUnavailable,
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no hosts configured")]
    NoHosts,
    #[error("history size must be at least 1")]
    InvalidHistory,
    #[error("interval must be at least 1 second")]
    InvalidInterval,
    #[error("{0} timeout must be at least 1 ms")]
    InvalidTimeout(&'static str),
}

/// Why a single probe method failed. Never leaves the prober.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("ICMP socket unavailable")]
    IcmpUnavailable,
    #[error("ICMP echo failed: {0}")]
    Icmp(#[from] surge_ping::SurgeError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("broadcast sink is closed")]
    Closed,
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("observer server failed: {0}")]
    Server(#[from] warp::Error),
}
