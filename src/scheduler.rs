use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, trace};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::aggregator::HostRegistry;
use crate::error::PublishError;
use crate::ping::{ProbeOutcome, Snapshot};
use crate::probe::Probe;
use crate::sink::BroadcastSink;

pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    ProbingCycle,
    Publishing,
    Sleeping,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::ProbingCycle => write!(f, "probing"),
            SchedulerState::Publishing => write!(f, "publishing"),
            SchedulerState::Sleeping => write!(f, "sleeping"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Drives the probe, publish, sleep cycle over a fixed host set.
pub struct Scheduler {
    hosts: Vec<String>,
    registry: Arc<HostRegistry>,
    prober: Arc<dyn Probe>,
    sink: Arc<dyn BroadcastSink>,
    interval: Duration,
    publish_timeout: Duration,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        mut hosts: Vec<String>,
        registry: Arc<HostRegistry>,
        prober: Arc<dyn Probe>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        // A repeated host would be probed twice per cycle.
        let mut seen = HashSet::new();
        hosts.retain(|host| seen.insert(host.clone()));

        for host in &hosts {
            registry.get_or_insert(host.as_str());
        }
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            hosts,
            registry,
            prober,
            sink,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            state,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn enter(&self, state: SchedulerState) {
        trace!("scheduler {state}");
        self.state.send_replace(state);
    }

    /// Runs cycles until `cancel` fires. In-flight probes are dropped on
    /// cancellation, which closes their sockets.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "monitoring {} every {}s",
            self.hosts.join(", "),
            self.interval.as_secs_f64()
        );

        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                snapshot = self.probe_all() => snapshot,
            };

            self.publish(&snapshot).await;

            self.enter(SchedulerState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.enter(SchedulerState::Stopped);
        info!("monitoring stopped");
    }

    /// Probes every host once, publishes the result, and returns the published snapshot.
    pub async fn run_cycle(&self) -> Snapshot {
        let snapshot = self.probe_all().await;
        self.publish(&snapshot).await;
        snapshot
    }

    async fn probe_all(&self) -> Snapshot {
        self.enter(SchedulerState::ProbingCycle);
        debug!("probe cycle started for {} hosts", self.hosts.len());

        join_all(self.hosts.iter().map(|host| self.probe_host(host))).await;

        self.registry.snapshot()
    }

    async fn probe_host(&self, host: &str) {
        let outcome = self.prober.probe(host).await;
        let previous = self.registry.record(host, outcome.sample());

        match outcome {
            ProbeOutcome::Reachable { latency_ms, method } => {
                if previous.is_some_and(|sample| sample < 0) {
                    info!("{host} is UP again ({latency_ms} ms via {method})");
                } else {
                    debug!("{host} latency {latency_ms} ms via {method}");
                }
            }
            ProbeOutcome::Unreachable => {
                if previous.is_none_or(|sample| sample >= 0) {
                    info!("{host} is DOWN");
                }
            }
        }
    }

    async fn publish(&self, snapshot: &Snapshot) {
        self.enter(SchedulerState::Publishing);

        let result = match timeout(self.publish_timeout, self.sink.publish(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        };
        if let Err(e) = result {
            debug!("snapshot broadcast failed (non-fatal): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::ProbeMethod;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Answers each host after a fixed delay; hosts missing from the map are unreachable.
    struct ScriptedProbe {
        answers: HashMap<String, (Duration, Option<u64>)>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(answers: &[(&str, u64, Option<u64>)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(host, delay_ms, latency)| {
                        (host.to_string(), (Duration::from_millis(*delay_ms), *latency))
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, host: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.get(host) {
                Some((delay, latency)) => {
                    tokio::time::sleep(*delay).await;
                    latency.map_or(ProbeOutcome::Unreachable, |ms| {
                        ProbeOutcome::reachable(ms, ProbeMethod::Tcp)
                    })
                }
                None => ProbeOutcome::Unreachable,
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(Instant, Snapshot)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        fn published(&self) -> Vec<(Instant, Snapshot)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BroadcastSink for RecordingSink {
        async fn publish(&self, snapshot: &Snapshot) -> Result<usize, PublishError> {
            self.published.lock().unwrap().push((Instant::now(), snapshot.clone()));
            if self.fail { Err(PublishError::Closed) } else { Ok(1) }
        }
    }

    struct StalledSink;

    #[async_trait]
    impl BroadcastSink for StalledSink {
        async fn publish(&self, _snapshot: &Snapshot) -> Result<usize, PublishError> {
            std::future::pending().await
        }
    }

    fn scheduler(
        hosts: &[&str],
        probe: Arc<ScriptedProbe>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Scheduler {
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        let registry = Arc::new(HostRegistry::new(hosts.clone(), 60));
        Scheduler::new(hosts, registry, probe, sink)
    }

    #[tokio::test]
    async fn cycle_waits_for_slowest_host_and_publishes_once() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 190, Some(190)), ("b", 10, Some(10))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(&["a", "b"], probe, sink.clone());

        let started = Instant::now();
        let snapshot = scheduler.run_cycle().await;

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].0.duration_since(started) >= Duration::from_millis(190));
        assert_eq!(published[0].1, snapshot);
        assert_eq!(snapshot["a"].last_latency_ms, 190);
        assert_eq!(snapshot["b"].last_latency_ms, 10);
    }

    #[tokio::test]
    async fn fast_host_is_recorded_before_slow_host_finishes() {
        let probe = Arc::new(ScriptedProbe::new(&[("slow", 300, Some(300)), ("fast", 5, Some(5))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(scheduler(&["slow", "fast"], probe, sink.clone()));

        let cycle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let registry = scheduler.registry();
        assert_eq!(registry.get("fast").unwrap().snapshot().packets_sent, 1);
        assert_eq!(registry.get("slow").unwrap().snapshot().packets_sent, 0);
        assert!(sink.published().is_empty());

        cycle.await.unwrap();
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn failed_probe_counts_as_lost_packet() {
        let probe = Arc::new(ScriptedProbe::new(&[("down", 0, None)]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(&["down"], probe, sink);

        let first = scheduler.run_cycle().await;
        let second = scheduler.run_cycle().await;

        assert_eq!(first["down"].packets_lost, 1);
        assert_eq!(second["down"].last_latency_ms, -1);
        assert_eq!(second["down"].packets_sent, 2);
        assert_eq!(second["down"].packets_lost, 2);
        assert_eq!(second["down"].packet_loss_percent(), 100.0);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_cycles() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 0, Some(3))]));
        let sink = Arc::new(RecordingSink::failing());
        let scheduler = scheduler(&["a"], probe, sink.clone());

        scheduler.run_cycle().await;
        let snapshot = scheduler.run_cycle().await;

        assert_eq!(sink.published().len(), 2);
        assert_eq!(snapshot["a"].packets_sent, 2);
    }

    #[tokio::test]
    async fn stalled_sink_is_bounded_by_publish_timeout() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 0, Some(3))]));
        let scheduler = scheduler(&["a"], probe, Arc::new(StalledSink))
            .with_publish_timeout(Duration::from_millis(50));

        let snapshot = tokio::time::timeout(Duration::from_secs(2), scheduler.run_cycle())
            .await
            .expect("publish should time out");
        assert_eq!(snapshot["a"].last_latency_ms, 3);
    }

    #[tokio::test]
    async fn snapshot_includes_hosts_added_outside_the_cycle() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 0, Some(3))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(&["a"], probe, sink);

        scheduler.registry().record("stray", 8);
        let snapshot = scheduler.run_cycle().await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["stray"].last_latency_ms, 8);
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 0, Some(3))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(
            scheduler(&["a"], probe, sink.clone()).with_interval(Duration::from_secs(3600)),
        );
        let cancel = CancellationToken::new();

        let mut state = scheduler.watch_state();
        let run = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        state.wait_for(|s| *s == SchedulerState::Sleeping).await.unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("scheduler should stop promptly")
            .unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_probes() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 60_000, Some(1))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(scheduler(&["a"], probe.clone(), sink.clone()));
        let cancel = CancellationToken::new();

        let run = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("scheduler should stop promptly")
            .unwrap();

        assert!(sink.published().is_empty());
        assert_eq!(scheduler.registry().get("a").unwrap().snapshot().packets_sent, 0);
    }

    #[tokio::test]
    async fn repeated_cycles_append_in_cycle_order() {
        let probe = Arc::new(ScriptedProbe::new(&[("a", 0, Some(4))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(
            scheduler(&["a"], probe, sink.clone()).with_interval(Duration::from_millis(10)),
        );
        let cancel = CancellationToken::new();

        let run = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        while sink.published().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        run.await.unwrap();

        let published = sink.published();
        let sent: Vec<u64> = published.iter().map(|(_, s)| s["a"].packets_sent).collect();
        assert!(sent.windows(2).all(|pair| pair[1] == pair[0] + 1));
    }

    #[tokio::test]
    async fn repeated_host_is_checked_once_per_cycle() {
        let script = Arc::new(ScriptedProbe::new(&[("a", 0, Some(4)), ("b", 0, Some(5))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(&["a", "b", "a"], script.clone(), sink);

        let snapshot = scheduler.run_cycle().await;

        assert_eq!(script.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snapshot["a"].packets_sent, 1);
        assert_eq!(snapshot["b"].packets_sent, 1);
    }

    #[tokio::test]
    async fn sleeps_full_interval_between_publishes() {
        let interval = Duration::from_millis(60);
        let script = Arc::new(ScriptedProbe::new(&[("a", 0, Some(4))]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(scheduler(&["a"], script, sink.clone()).with_interval(interval));
        let cancel = CancellationToken::new();

        let run = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        while sink.published().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        run.await.unwrap();

        let published = sink.published();
        for pair in published.windows(2) {
            let gap = pair[1].0.duration_since(pair[0].0);
            assert!(gap >= interval, "publishes only {gap:?} apart");
        }
    }
}
