use crate::discovery::{select_targets, Discovery, Identity};
use crate::error::Error;
use crate::limiter::Limiter;
use crate::prober::Prober;
use crate::store::SnapshotStore;
use crate::types::{PortResult, PortState, Protocol, Snapshot, StateCounts, Target, TargetReport};
use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which port results a snapshot keeps. Counts always cover every probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    /// Keep only open ports.
    #[default]
    Open,
    /// Keep every result, including closed and errored ports.
    All,
}

impl Retention {
    fn keeps(self, state: PortState) -> bool {
        match self {
            Retention::Open => state == PortState::Open,
            Retention::All => true,
        }
    }
}

/// What a cycle does with its snapshot when discovery failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryFailurePolicy {
    /// Publish an empty snapshot so age and liveness reflect the outage.
    #[default]
    PublishEmpty,
    /// Leave the previous snapshot in place and let it age.
    KeepPrevious,
}

/// Knobs for a scan cycle.
#[derive(Clone)]
pub struct ScanSettings {
    pub ports: Arc<[u16]>,
    pub concurrency: usize,
    pub retention: Retention,
    pub on_discovery_failure: DiscoveryFailurePolicy,
    /// Optional bound on a whole cycle. Probes not finished by then are dropped.
    pub deadline: Option<Duration>,
}

impl ScanSettings {
    pub fn new(ports: Vec<u16>, concurrency: usize) -> Self {
        Self {
            ports: ports.into(),
            concurrency,
            retention: Retention::default(),
            on_discovery_failure: DiscoveryFailurePolicy::default(),
            deadline: None,
        }
    }
}

impl std::fmt::Debug for ScanSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSettings")
            .field("ports", &self.ports.len())
            .field("concurrency", &self.concurrency)
            .field("retention", &self.retention)
            .field("on_discovery_failure", &self.on_discovery_failure)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// One discovery, scan, aggregate and publish pass.
pub struct ScanCycle {
    discovery: Arc<dyn Discovery>,
    prober: Arc<dyn Prober>,
    identity: Identity,
    settings: ScanSettings,
    limiter: Limiter,
    store: SnapshotStore,
}

impl std::fmt::Debug for ScanCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCycle")
            .field("identity", &self.identity)
            .field("settings", &self.settings)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// A classified probe on its way to the collector.
struct Probed {
    index: usize,
    dispatched: Instant,
    result: PortResult,
}

/// Running totals for one target.
#[derive(Clone, Copy, Default)]
struct Tally {
    counts: StateCounts,
    /// Dispatch time of the target's earliest probe.
    started: Option<Instant>,
    took: Duration,
}

impl Tally {
    fn record(&mut self, state: PortState, dispatched: Instant, finished: Instant) {
        self.counts.record(state);
        let started = self.started.map_or(dispatched, |s| s.min(dispatched));
        self.started = Some(started);
        self.took = self.took.max(finished.saturating_duration_since(started));
    }
}

/// Built by the collector task, which is its only writer.
struct Aggregate {
    per_target: Vec<Tally>,
    results: Vec<(usize, PortResult)>,
    counts: StateCounts,
    by_protocol: BTreeMap<Protocol, StateCounts>,
}

impl ScanCycle {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        prober: Arc<dyn Prober>,
        identity: Identity,
        settings: ScanSettings,
        store: SnapshotStore,
    ) -> Self {
        let limiter = Limiter::new(settings.concurrency);
        Self {
            discovery,
            prober,
            identity,
            settings,
            limiter,
            store,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Scan once and publish the result. Never fails: problems degrade the snapshot.
    pub async fn run(&self, cancel: &CancellationToken) -> Arc<Snapshot> {
        let snapshot = self.scan(cancel).await;

        if snapshot.discovery_error.is_some()
            && self.settings.on_discovery_failure == DiscoveryFailurePolicy::KeepPrevious
        {
            info!("discovery failed; keeping previous snapshot");
            return Arc::new(snapshot);
        }

        self.store.publish(snapshot).snapshot.clone()
    }

    /// Scan once without publishing.
    pub async fn scan(&self, cancel: &CancellationToken) -> Snapshot {
        let start = Instant::now();

        // The deadline covers discovery too.
        let cancel = cancel.child_token();
        let timer = self.settings.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                time::sleep(deadline).await;
                warn!(?deadline, "scan cycle deadline reached");
                cancel.cancel();
            })
        });

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Discovery("cycle cancelled before targets were listed".into())),
            listed = self.discovery.list_targets(&self.identity.node) => listed,
        };
        let discovery_interrupted = cancel.is_cancelled();
        let (targets, discovery_error) = match listed {
            Ok(candidates) => (select_targets(candidates, &self.identity), None),
            Err(e) => {
                warn!(error = %e, node = %self.identity.node, "target discovery failed");
                (Vec::new(), Some(e.to_string()))
            }
        };
        let targets: Vec<Arc<Target>> = targets.into_iter().map(Arc::new).collect();
        for t in &targets {
            debug!(name = %t.name, namespace = %t.namespace, ip = %t.ip, "scanning target");
        }

        let (tx, rx) = mpsc::channel(self.limiter.capacity());
        let collector = tokio::spawn(collect(rx, targets.len(), self.settings.retention));

        let mut set = JoinSet::new();
        'targets: for (index, target) in targets.iter().enumerate() {
            for protocol in Protocol::ALL {
                for &port in self.settings.ports.iter() {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'targets,
                        permit = self.limiter.acquire() => match permit {
                            Ok(p) => p,
                            Err(e) => {
                                error!(error = %e, "cannot schedule probes");
                                break 'targets;
                            }
                        },
                    };

                    let dispatched = Instant::now();
                    let tx = tx.clone();
                    let prober = self.prober.clone();
                    let target = target.clone();
                    let cancel = cancel.clone();
                    set.spawn(async move {
                        let state = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            state = prober.probe(&target, protocol, port) => state,
                        };
                        drop(permit);
                        let result = PortResult {
                            target,
                            protocol,
                            port,
                            state,
                        };
                        // The collector outlives every sender.
                        let _ = tx.send(Probed { index, dispatched, result }).await;
                    });

                    while let Some(res) = set.try_join_next() {
                        log_probe_failure(res);
                    }
                }
            }
        }
        drop(tx);

        while let Some(res) = set.join_next().await {
            log_probe_failure(res);
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let aggregate = match collector.await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "result collector failed");
                Aggregate::new(targets.len())
            }
        };
        let duration = start.elapsed();

        let ports_per_target = (self.settings.ports.len() * Protocol::ALL.len()) as u64;
        let mut snapshot = assemble(targets, aggregate, ports_per_target, duration, discovery_error);
        if discovery_interrupted {
            snapshot.complete = false;
        }
        log_summary(&snapshot);
        snapshot
    }
}

fn log_probe_failure(res: Result<(), JoinError>) {
    if let Err(e) = res {
        warn!(error = %e, "probe task failed");
    }
}

impl Aggregate {
    fn new(targets: usize) -> Self {
        Self {
            per_target: vec![Tally::default(); targets],
            results: Vec::new(),
            counts: StateCounts::default(),
            by_protocol: BTreeMap::new(),
        }
    }
}

/// Fan-in: drain the results channel until every sender is gone.
async fn collect(
    mut rx: mpsc::Receiver<Probed>,
    targets: usize,
    retention: Retention,
) -> Aggregate {
    let mut agg = Aggregate::new(targets);
    while let Some(Probed { index, dispatched, result }) = rx.recv().await {
        let state = result.state;
        if let Some(tally) = agg.per_target.get_mut(index) {
            tally.record(state, dispatched, Instant::now());
        }
        agg.counts.record(state);
        agg.by_protocol.entry(result.protocol).or_default().record(state);

        if state == PortState::Open {
            debug!(
                name = %result.target.name,
                namespace = %result.target.namespace,
                protocol = %result.protocol,
                port = result.port,
                "open port"
            );
        }
        if retention.keeps(state) {
            agg.results.push((index, result));
        }
    }
    agg
}

fn assemble(
    targets: Vec<Arc<Target>>,
    mut agg: Aggregate,
    ports_per_target: u64,
    duration: Duration,
    discovery_error: Option<String>,
) -> Snapshot {
    agg.results
        .sort_unstable_by_key(|(index, r)| (*index, r.protocol, r.port));
    let expected = targets.len() as u64 * ports_per_target;
    let complete = agg.counts.total() == expected;

    let reports = targets
        .into_iter()
        .zip(agg.per_target)
        .map(|(target, tally)| TargetReport {
            target,
            counts: tally.counts,
            took: tally.took,
        })
        .collect();

    Snapshot {
        targets: reports,
        results: agg.results.into_iter().map(|(_, r)| r).collect(),
        counts: agg.counts,
        by_protocol: agg.by_protocol,
        ports_per_target,
        duration,
        complete,
        discovery_error,
    }
}

fn log_summary(s: &Snapshot) {
    info!(
        targets = s.targets.len(),
        results = s.results.len(),
        open = s.counts.open,
        closed = s.counts.closed,
        errors = s.counts.error,
        total = s.total(),
        took = ?s.duration,
        targets_per_sec = s.targets_per_second(),
        ports_per_sec = s.ports_per_second(),
        complete = s.complete,
        "scan cycle finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Candidate;
    use crate::error::{Error, Result};
    use async_trait::async_trait;

    struct Fixed(Vec<Candidate>);

    #[async_trait]
    impl Discovery for Fixed {
        async fn list_targets(&self, _node: &str) -> Result<Vec<Candidate>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl Discovery for Broken {
        async fn list_targets(&self, _node: &str) -> Result<Vec<Candidate>> {
            Err(Error::Discovery("api server unreachable".into()))
        }
    }

    /// Even ports open, multiples of 3 error, the rest closed.
    struct Pattern;

    #[async_trait]
    impl Prober for Pattern {
        async fn probe(&self, _t: &Target, _p: Protocol, port: u16) -> PortState {
            if port % 2 == 0 {
                PortState::Open
            } else if port % 3 == 0 {
                PortState::Error
            } else {
                PortState::Closed
            }
        }
    }

    fn cand(name: &str) -> Candidate {
        Candidate {
            name: name.into(),
            namespace: "default".into(),
            ip: "10.0.0.1".into(),
            node: "node-a".into(),
            running: true,
            host_network: false,
        }
    }

    fn cycle(discovery: Arc<dyn Discovery>, settings: ScanSettings) -> ScanCycle {
        ScanCycle::new(
            discovery,
            Arc::new(Pattern),
            Identity::default(),
            settings,
            SnapshotStore::new(),
        )
    }

    #[tokio::test]
    async fn counts_cover_every_probe_and_only_open_are_kept() {
        let c = cycle(
            Arc::new(Fixed(vec![cand("a"), cand("b")])),
            ScanSettings::new((1..=12).collect(), 4),
        );
        let snap = c.run(&CancellationToken::new()).await;

        assert_eq!(snap.total(), 24);
        assert_eq!(snap.counts.open, 12);
        assert_eq!(snap.counts.error, 4);
        assert_eq!(snap.counts.closed, 8);
        assert!(snap.complete);
        assert_eq!(snap.results.len(), 12);
        assert!(snap.results.iter().all(|r| r.state == PortState::Open));

        let ports: Vec<u16> = snap.results.iter().take(6).map(|r| r.port).collect();
        assert_eq!(ports, vec![2, 4, 6, 8, 10, 12]);
        assert_eq!(snap.results[0].target.name, "a");
        assert_eq!(snap.results[6].target.name, "b");

        for report in &snap.targets {
            assert_eq!(report.counts.total(), 12);
        }
        assert!(c.store().current().is_some());
    }

    #[tokio::test]
    async fn retain_all_keeps_closed_and_errors() {
        let mut settings = ScanSettings::new((1..=6).collect(), 2);
        settings.retention = Retention::All;
        let c = cycle(Arc::new(Fixed(vec![cand("a")])), settings);
        let snap = c.run(&CancellationToken::new()).await;
        assert_eq!(snap.results.len(), 6);
    }

    #[tokio::test]
    async fn discovery_failure_publishes_empty_snapshot() {
        let c = cycle(Arc::new(Broken), ScanSettings::new(vec![80], 1));
        let snap = c.run(&CancellationToken::new()).await;
        assert!(snap.targets.is_empty());
        assert_eq!(snap.total(), 0);
        assert!(snap.discovery_error.is_some());
        assert!(c.store().current().is_some());
    }

    #[tokio::test]
    async fn discovery_failure_can_keep_previous() {
        let mut settings = ScanSettings::new(vec![80], 1);
        settings.on_discovery_failure = DiscoveryFailurePolicy::KeepPrevious;
        let c = cycle(Arc::new(Broken), settings);
        let earlier = c.store().publish(Snapshot::empty());

        let snap = c.run(&CancellationToken::new()).await;
        assert!(snap.discovery_error.is_some());

        let held = c.store().current().unwrap();
        assert!(Arc::ptr_eq(&held, &earlier));
    }

    /// Never answers.
    struct Hung;

    #[async_trait]
    impl Discovery for Hung {
        async fn list_targets(&self, _node: &str) -> Result<Vec<Candidate>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_hung_discovery() {
        let mut settings = ScanSettings::new(vec![80], 1);
        settings.deadline = Some(Duration::from_secs(5));
        let c = cycle(Arc::new(Hung), settings);

        let snap = time::timeout(Duration::from_secs(60), c.run(&CancellationToken::new()))
            .await
            .expect("deadline should end discovery");

        assert!(!snap.complete);
        assert!(snap.targets.is_empty());
        assert!(snap.discovery_error.is_some());
        assert!(c.store().current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn took_is_measured_per_target() {
        struct Slow;

        #[async_trait]
        impl Prober for Slow {
            async fn probe(&self, _t: &Target, _p: Protocol, _port: u16) -> PortState {
                time::sleep(Duration::from_millis(50)).await;
                PortState::Closed
            }
        }

        let c = ScanCycle::new(
            Arc::new(Fixed(vec![cand("a"), cand("b"), cand("c")])),
            Arc::new(Slow),
            Identity::default(),
            ScanSettings::new(vec![80, 443], 1),
            SnapshotStore::new(),
        );
        let snap = c.run(&CancellationToken::new()).await;

        assert_eq!(snap.targets.len(), 3);
        for report in &snap.targets {
            assert!(
                report.took >= Duration::from_millis(100) && report.took < Duration::from_millis(150),
                "{} took {:?} for two 50ms probes",
                report.target.name,
                report.took
            );
        }
        assert!(snap.duration >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn cancelled_cycle_is_incomplete() {
        let c = cycle(
            Arc::new(Fixed(vec![cand("a")])),
            ScanSettings::new(full_ports(), 8),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let snap = c.run(&cancel).await;
        assert!(!snap.complete);
        assert!(snap.total() < 65_535);
    }

    fn full_ports() -> Vec<u16> {
        crate::ports::full_range()
    }
}
