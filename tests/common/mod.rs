#![allow(dead_code)]

use async_trait::async_trait;
use port_scan_exporter::discovery::{Candidate, Discovery, Identity};
use port_scan_exporter::error::{Error, Result};
use port_scan_exporter::prober::Prober;
use port_scan_exporter::types::{PortState, Protocol, Target};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn candidate(name: &str, ip: &str) -> Candidate {
    Candidate {
        name: name.into(),
        namespace: "default".into(),
        ip: ip.into(),
        node: "node-a".into(),
        running: true,
        host_network: false,
    }
}

pub fn identity() -> Identity {
    Identity {
        name: "port-scan-exporter-x7k2p".into(),
        namespace: "monitoring".into(),
        node: "node-a".into(),
    }
}

/// Returns the same candidates every cycle and counts calls.
pub struct StaticDiscovery {
    pub candidates: Vec<Candidate>,
    pub calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list_targets(&self, _node: &str) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }
}

pub struct FailingDiscovery;

#[async_trait]
impl Discovery for FailingDiscovery {
    async fn list_targets(&self, _node: &str) -> Result<Vec<Candidate>> {
        Err(Error::Discovery("connection reset by apiserver".into()))
    }
}

/// Sleeps for `delay` per probe and records the peak number of concurrent probes.
pub struct CountingProber {
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub probes: AtomicUsize,
}

impl CountingProber {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prober for CountingProber {
    async fn probe(&self, _target: &Target, _protocol: Protocol, _port: u16) -> PortState {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.probes.fetch_add(1, Ordering::SeqCst);
        PortState::Closed
    }
}

/// Flags any probe that starts while another cycle's probe is still running.
pub struct ExclusiveProber {
    pub delay: Duration,
    pub busy: Arc<AtomicBool>,
    pub overlapped: Arc<AtomicBool>,
}

#[async_trait]
impl Prober for ExclusiveProber {
    async fn probe(&self, _target: &Target, _protocol: Protocol, _port: u16) -> PortState {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        self.busy.store(false, Ordering::SeqCst);
        PortState::Open
    }
}
