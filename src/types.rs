use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One scannable workload on the local node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
    pub namespace: String,
    /// Dotted quad, or empty when the workload has no address yet.
    pub ip: String,
    pub node: String,
}

/// Transport protocol a probe is made with. Only TCP is scanned.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
}

impl Protocol {
    pub const ALL: [Protocol; 1] = [Protocol::Tcp];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a single probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Error,
}

impl PortState {
    pub const ALL: [PortState; 3] = [PortState::Open, PortState::Closed, PortState::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Error => "error",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe against a (target, protocol, port) tuple.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub target: Arc<Target>,
    pub protocol: Protocol,
    pub port: u16,
    pub state: PortState,
}

/// Per-state totals.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub open: u64,
    pub closed: u64,
    pub error: u64,
}

impl StateCounts {
    pub fn record(&mut self, state: PortState) {
        match state {
            PortState::Open => self.open += 1,
            PortState::Closed => self.closed += 1,
            PortState::Error => self.error += 1,
        }
    }

    pub fn get(&self, state: PortState) -> u64 {
        match state {
            PortState::Open => self.open,
            PortState::Closed => self.closed,
            PortState::Error => self.error,
        }
    }

    pub fn total(&self) -> u64 {
        self.open + self.closed + self.error
    }
}

/// What one cycle learned about a single target.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: Arc<Target>,
    pub counts: StateCounts,
    /// Time from the dispatch of this target's first probe until its last probe finished.
    #[serde(with = "duration_secs")]
    pub took: Duration,
}

/// Immutable aggregate of one full scan cycle.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub targets: Vec<TargetReport>,
    pub results: Vec<PortResult>,
    pub counts: StateCounts,
    pub by_protocol: BTreeMap<Protocol, StateCounts>,
    pub ports_per_target: u64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// False when the cycle was cut short by a deadline or shutdown.
    pub complete: bool,
    pub discovery_error: Option<String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            targets: Vec::new(),
            results: Vec::new(),
            counts: StateCounts::default(),
            by_protocol: BTreeMap::new(),
            ports_per_target: 0,
            duration: Duration::ZERO,
            complete: true,
            discovery_error: None,
        }
    }

    /// Number of probes classified this cycle.
    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    pub fn targets_per_second(&self) -> f64 {
        per_second(self.targets.len() as f64, self.duration)
    }

    pub fn ports_per_second(&self) -> f64 {
        per_second(self.total() as f64, self.duration)
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &PortResult> {
        self.results.iter().filter(|r| r.state == PortState::Open)
    }
}

fn per_second(n: f64, took: Duration) -> f64 {
    let secs = took.as_secs_f64();
    if secs > 0.0 {
        n / secs
    } else {
        0.0
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
