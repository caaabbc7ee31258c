use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::dns_cache::DnsCache;
use crate::error::ProbeError;
use crate::ping::{ProbeMethod, ProbeOutcome};

pub const DEFAULT_ICMP_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_TCP_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_TCP_PORT: u16 = 80;

/// Measures one host's latency. Failures are folded into [`ProbeOutcome::Unreachable`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, host: &str) -> ProbeOutcome;
}

/// One reachability method against an already resolved address.
#[async_trait]
pub trait Checker: Send + Sync {
    fn method(&self) -> ProbeMethod;

    /// Returns the measured latency in whole milliseconds.
    async fn check(&self, ip: IpAddr) -> Result<u64, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub icmp_enabled: bool,
    pub icmp_timeout: Duration,
    pub tcp_timeout: Duration,
    pub tcp_port: u16,
    pub dns_ttl: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            icmp_enabled: true,
            icmp_timeout: Duration::from_millis(DEFAULT_ICMP_TIMEOUT_MS),
            tcp_timeout: Duration::from_millis(DEFAULT_TCP_TIMEOUT_MS),
            tcp_port: DEFAULT_TCP_PORT,
            dns_ttl: Duration::from_secs(crate::dns_cache::DEFAULT_DNS_TTL_SECS),
        }
    }
}

/// ICMP echo checker. Needs a raw or unprivileged ICMP socket; when the
/// platform refuses one, every check fails fast with [`ProbeError::IcmpUnavailable`].
pub struct IcmpChecker {
    v4: Option<Client>,
    v6: Option<Client>,
    timeout: Duration,
    next_request: AtomicU16,
}

impl IcmpChecker {
    /// Opens the ICMP sockets. Must be called from within a tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        let open = |kind: ICMP, family: &str| match Client::new(&Config::builder().kind(kind).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("ICMP unavailable for {family} ({e}), probes will use the TCP fallback");
                None
            }
        };

        Self {
            v4: open(ICMP::V4, "IPv4"),
            v6: open(ICMP::V6, "IPv6"),
            timeout,
            next_request: AtomicU16::new(1),
        }
    }

    pub fn disabled(timeout: Duration) -> Self {
        Self { v4: None, v6: None, timeout, next_request: AtomicU16::new(1) }
    }

    pub fn is_available(&self) -> bool {
        self.v4.is_some() || self.v6.is_some()
    }

    // Datagram ICMP sockets rewrite the identifier, so replies are matched on
    // address and sequence alone. Both advance together.
    fn next_request(&self) -> (PingIdentifier, PingSequence) {
        let n = self.next_request.fetch_add(1, Ordering::Relaxed);
        (PingIdentifier(n), PingSequence(n))
    }
}

#[async_trait]
impl Checker for IcmpChecker {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Icmp
    }

    async fn check(&self, ip: IpAddr) -> Result<u64, ProbeError> {
        let client = match ip {
            IpAddr::V4(_) => self.v4.as_ref(),
            IpAddr::V6(_) => self.v6.as_ref(),
        }
        .ok_or(ProbeError::IcmpUnavailable)?;

        let (ident, seq) = self.next_request();
        let mut pinger = client.pinger(ip, ident).await;
        pinger.timeout(self.timeout);

        let (_packet, rtt) = pinger.ping(seq, &[0; 8]).await?;
        Ok(rtt.as_millis() as u64)
    }
}

/// TCP handshake checker. A completed connect is success; nothing is sent.
pub struct TcpChecker {
    port: u16,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl Checker for TcpChecker {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Tcp
    }

    async fn check(&self, ip: IpAddr) -> Result<u64, ProbeError> {
        let start = Instant::now();

        let stream = timeout(self.timeout, TcpStream::connect(SocketAddr::new(ip, self.port)))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(ProbeError::Connect)?;

        let latency = start.elapsed().as_millis() as u64;
        drop(stream);
        Ok(latency)
    }
}

/// Resolves the host, tries the primary checker and falls back to the second on any error.
pub struct FallbackProber {
    dns: Arc<DnsCache>,
    resolve_timeout: Duration,
    primary: Box<dyn Checker>,
    fallback: Box<dyn Checker>,
}

impl FallbackProber {
    pub fn new(dns: Arc<DnsCache>, primary: Box<dyn Checker>, fallback: Box<dyn Checker>) -> Self {
        Self { dns, resolve_timeout: Duration::from_millis(DEFAULT_TCP_TIMEOUT_MS), primary, fallback }
    }

    /// ICMP first, TCP connect to `settings.tcp_port` second.
    pub fn from_settings(settings: &ProbeSettings) -> Self {
        let icmp = if settings.icmp_enabled {
            IcmpChecker::new(settings.icmp_timeout)
        } else {
            IcmpChecker::disabled(settings.icmp_timeout)
        };
        let tcp = TcpChecker::new(settings.tcp_port, settings.tcp_timeout);

        Self::new(Arc::new(DnsCache::new(settings.dns_ttl)), Box::new(icmp), Box::new(tcp))
            .with_resolve_timeout(settings.tcp_timeout)
    }

    pub fn with_resolve_timeout(mut self, resolve_timeout: Duration) -> Self {
        self.resolve_timeout = resolve_timeout;
        self
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        timeout(self.resolve_timeout, self.dns.resolve(host))
            .await
            .map_err(|_| ProbeError::Timeout(self.resolve_timeout))?
    }
}

#[async_trait]
impl Probe for FallbackProber {
    async fn probe(&self, host: &str) -> ProbeOutcome {
        let ip = match self.resolve(host).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("{host}: {e}");
                return ProbeOutcome::Unreachable;
            }
        };

        match self.primary.check(ip).await {
            Ok(latency_ms) => return ProbeOutcome::reachable(latency_ms, self.primary.method()),
            Err(e) => debug!(
                "{} probe failed for {host} ({ip}), trying {}: {e}",
                self.primary.method(),
                self.fallback.method()
            ),
        }

        match self.fallback.check(ip).await {
            Ok(latency_ms) => ProbeOutcome::reachable(latency_ms, self.fallback.method()),
            Err(e) => {
                debug!("{} fallback failed for {host} ({ip}): {e}", self.fallback.method());
                // The address may have moved; resolve again next cycle.
                self.dns.invalidate(host);
                ProbeOutcome::Unreachable
            }
        }
    }
}
