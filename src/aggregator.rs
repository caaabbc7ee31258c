use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use crate::ping::{FAILED_SAMPLE, HostStats, Snapshot};

pub const DEFAULT_HISTORY_SIZE: usize = 60;

#[derive(Debug, Default)]
struct History {
    samples: VecDeque<i64>,
    total_sent: u64,
    total_lost: u64,
}

/// Bounded rolling history of one host's samples.
///
/// Samples are `-1` for a failed probe and a latency in milliseconds otherwise.
/// Adding a sample and taking a snapshot both hold the same lock, so a snapshot
/// never sees a half-applied sample.
#[derive(Debug)]
pub struct HostAggregator {
    host: String,
    max_samples: usize,
    history: Mutex<History>,
}

impl HostAggregator {
    pub fn new(host: impl Into<String>, max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            host: host.into(),
            max_samples,
            history: Mutex::new(History {
                samples: VecDeque::with_capacity(max_samples),
                ..History::default()
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    // Every mutation completes before the guard drops, so a poisoned lock
    // still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_sample(&self, value: i64) {
        let mut history = self.lock();
        history.samples.push_back(value);
        while history.samples.len() > self.max_samples {
            history.samples.pop_front();
        }
        history.total_sent += 1;
        if value < 0 {
            history.total_lost += 1;
        }
    }

    pub fn last_sample(&self) -> Option<i64> {
        self.lock().samples.back().copied()
    }

    /// Copy of the retained window, oldest first.
    pub fn history(&self) -> Vec<i64> {
        self.lock().samples.iter().copied().collect()
    }

    pub fn snapshot(&self) -> HostStats {
        let history = self.lock();

        let (sum, count) = history
            .samples
            .iter()
            .filter(|sample| **sample >= 0)
            .fold((0i128, 0u64), |(sum, count), sample| (sum + *sample as i128, count + 1));
        let avg_latency_ms = if count == 0 { 0.0 } else { sum as f64 / count as f64 };

        HostStats {
            host: self.host.clone(),
            last_latency_ms: history.samples.back().copied().unwrap_or(FAILED_SAMPLE),
            avg_latency_ms,
            packets_sent: history.total_sent,
            packets_lost: history.total_lost,
        }
    }
}

/// Every monitored host's aggregator, keyed by host name.
#[derive(Debug)]
pub struct HostRegistry {
    aggregators: DashMap<String, Arc<HostAggregator>>,
    history_size: usize,
}

impl HostRegistry {
    pub fn new<I, S>(hosts: I, history_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self { aggregators: DashMap::new(), history_size };
        for host in hosts {
            registry.get_or_insert(host.into());
        }
        registry
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub fn get(&self, host: &str) -> Option<Arc<HostAggregator>> {
        self.aggregators.get(host).map(|entry| entry.value().clone())
    }

    pub fn get_or_insert(&self, host: impl Into<String>) -> Arc<HostAggregator> {
        let host = host.into();
        if let Some(existing) = self.aggregators.get(&host) {
            return existing.value().clone();
        }
        self.aggregators
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostAggregator::new(host, self.history_size)))
            .value()
            .clone()
    }

    /// Adds a sample for `host`, creating its aggregator if the host is unknown.
    /// Returns the sample that was latest before this one.
    pub fn record(&self, host: &str, sample: i64) -> Option<i64> {
        let aggregator = self.get_or_insert(host);
        let previous = aggregator.last_sample();
        aggregator.add_sample(sample);
        previous
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> =
            self.aggregators.iter().map(|entry| entry.key().clone()).collect();
        hosts.sort();
        hosts
    }

    pub fn len(&self) -> usize {
        self.aggregators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        // Collect handles first so no map shard lock is held while an
        // aggregator lock is taken.
        let aggregators: Vec<Arc<HostAggregator>> =
            self.aggregators.iter().map(|entry| entry.value().clone()).collect();
        aggregators
            .into_iter()
            .map(|aggregator| (aggregator.host().to_string(), aggregator.snapshot()))
            .collect()
    }
}
