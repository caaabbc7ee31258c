pub mod aggregator;
pub mod args;
pub mod config;
pub mod dns_cache;
pub mod error;
pub mod ping;
pub mod probe;
pub mod scheduler;
pub mod server;
pub mod sink;

pub use aggregator::{HostAggregator, HostRegistry};
pub use config::AppConfig;
pub use ping::{HostStats, ProbeOutcome, Snapshot};
pub use probe::{FallbackProber, Probe};
pub use scheduler::Scheduler;
pub use sink::{BroadcastSink, ChannelSink};
