use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ProbeError;

pub const DEFAULT_DNS_TTL_SECS: u64 = 300;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Checks `hostname` is a plausible DNS name before it reaches the resolver.
/// Names are never rewritten: anything outside letters, digits, `-` and `_`
/// in dot-separated labels is rejected.
fn is_valid_hostname(hostname: &str) -> bool {
    let name = hostname.strip_suffix('.').unwrap_or(hostname);
    !name.is_empty()
        && name.len() <= MAX_HOSTNAME_LEN
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= MAX_LABEL_LEN
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

#[derive(Debug, Clone)]
struct DnsCacheEntry {
    ip_address: IpAddr,
    cached_at: Instant,
}

/// Host name to address cache shared by all probe tasks.
#[derive(Debug)]
pub struct DnsCache {
    ttl: Duration,
    cache: Mutex<HashMap<String, DnsCacheEntry>>,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DNS_TTL_SECS))
    }
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cache: Mutex::new(HashMap::new()) }
    }

    pub fn get_valid_ip(&self, hostname: &str) -> Option<IpAddr> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(hostname)
            .filter(|entry| entry.cached_at.elapsed() <= self.ttl)
            .map(|entry| entry.ip_address)
    }

    pub fn insert(&self, hostname: &str, ip_address: IpAddr) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(hostname.to_string(), DnsCacheEntry { ip_address, cached_at: Instant::now() });
    }

    /// Drops the cached address so the next lookup resolves again.
    pub fn invalidate(&self, hostname: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.remove(hostname);
    }

    /// Resolves `target` to an address, answering from the cache while the entry is fresh.
    pub async fn resolve(&self, target: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = target.parse::<IpAddr>() {
            return Ok(ip);
        }

        if let Some(ip) = self.get_valid_ip(target) {
            return Ok(ip);
        }

        if !is_valid_hostname(target) {
            return Err(ProbeError::Resolve {
                host: target.to_string(),
                reason: "invalid hostname".to_string(),
            });
        }

        let ip = tokio::net::lookup_host((target, 0))
            .await
            .map_err(|e| ProbeError::Resolve { host: target.to_string(), reason: e.to_string() })?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ProbeError::Resolve {
                host: target.to_string(),
                reason: "no addresses returned".to_string(),
            })?;

        self.insert(target, ip);
        Ok(ip)
    }
}
