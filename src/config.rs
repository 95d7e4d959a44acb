use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::discovery::Identity;
use crate::ports::{self, FULL_RANGE};
use crate::scanner::{DiscoveryFailurePolicy, Retention, ScanSettings};

/// Command line and environment configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-scan-exporter",
    version,
    about = "Scans every pod on this node and exports the open ports as Prometheus metrics.",
    long_about = None
)]
pub struct Config {
    /// Seconds between the start of two scan cycles.
    #[arg(long = "interval-secs", env = "PORT_SCAN_EXPORTER_INTERVAL_SECS", default_value_t = 60)]
    pub interval_secs: u64,

    /// Max concurrent TCP connect attempts.
    #[arg(long, env = "PORT_SCAN_EXPORTER_CONCURRENCY", default_value_t = 1024)]
    pub concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", env = "PORT_SCAN_EXPORTER_TIMEOUT_MS", default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Maximum age of the last scan, in seconds, before /healthz reports unhealthy.
    #[arg(long = "max-age-secs", env = "PORT_SCAN_EXPORTER_MAX_AGE_SECS", default_value_t = 600)]
    pub max_age_secs: u64,

    /// Listen address of the metrics and health endpoints.
    #[arg(long, env = "PORT_SCAN_EXPORTER_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: String,

    /// Ports to scan on every target: comma separated ports and inclusive ranges.
    #[arg(long, env = "PORT_SCAN_EXPORTER_PORTS", default_value = FULL_RANGE)]
    pub ports: String,

    /// Name of this pod, excluded from its own scan.
    #[arg(long = "pod-name", env = "PORT_SCAN_EXPORTER_POD_NAME", default_value = "")]
    pub pod_name: String,

    /// Namespace of this pod.
    #[arg(long = "pod-namespace", env = "PORT_SCAN_EXPORTER_POD_NAMESPACE", default_value = "")]
    pub pod_namespace: String,

    /// Node whose pods are scanned.
    #[arg(long = "node-name", env = "PORT_SCAN_EXPORTER_NODE_NAME", default_value = "")]
    pub node_name: String,

    /// Which port results to keep in a snapshot.
    #[arg(long = "retain-results", env = "PORT_SCAN_EXPORTER_RETAIN_RESULTS", value_enum, default_value_t = Retention::Open)]
    pub retain_results: Retention,

    /// What to publish when target discovery fails.
    #[arg(long = "on-discovery-failure", env = "PORT_SCAN_EXPORTER_ON_DISCOVERY_FAILURE", value_enum, default_value_t = DiscoveryFailurePolicy::PublishEmpty)]
    pub on_discovery_failure: DiscoveryFailurePolicy,

    /// Abort a scan cycle that runs longer than this many seconds. Unbounded if unset.
    #[arg(long = "cycle-deadline-secs", env = "PORT_SCAN_EXPORTER_CYCLE_DEADLINE_SECS")]
    pub cycle_deadline_secs: Option<u64>,

    /// Default log filter when RUST_LOG is not set.
    #[arg(long = "log-level", env = "PORT_SCAN_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json", env = "PORT_SCAN_EXPORTER_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("--interval-secs must be greater than zero");
        }
        if self.concurrency == 0 {
            bail!("--concurrency must be greater than zero");
        }
        if self.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        if self.cycle_deadline_secs == Some(0) {
            bail!("--cycle-deadline-secs must be greater than zero when set");
        }
        if self.port_list()?.is_empty() {
            bail!("--ports selects no ports");
        }
        Ok(())
    }

    pub fn port_list(&self) -> Result<Vec<u16>> {
        ports::parse_port_list(&self.ports)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            name: self.pod_name.clone(),
            namespace: self.pod_namespace.clone(),
            node: self.node_name.clone(),
        }
    }

    pub fn scan_settings(&self) -> Result<ScanSettings> {
        let mut settings = ScanSettings::new(self.port_list()?, self.concurrency);
        settings.retention = self.retain_results;
        settings.on_discovery_failure = self.on_discovery_failure;
        settings.deadline = self.cycle_deadline_secs.map(Duration::from_secs);
        Ok(settings)
    }
}
