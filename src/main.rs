use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use port_scan_exporter::config::Config;
use port_scan_exporter::health::Health;
use port_scan_exporter::kubernetes::KubeDiscovery;
use port_scan_exporter::logging;
use port_scan_exporter::prober::ConnectProber;
use port_scan_exporter::scanner::ScanCycle;
use port_scan_exporter::scheduler::Scheduler;
use port_scan_exporter::server::{self, AppState};
use port_scan_exporter::store::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    logging::init(&config.log_level, config.log_json)?;
    config.validate()?;

    info!(
        interval_secs = config.interval_secs,
        concurrency = config.concurrency,
        timeout_ms = config.timeout_ms,
        max_age_secs = config.max_age_secs,
        listen = %config.listen,
        ports = %config.ports,
        pod = %config.pod_name,
        namespace = %config.pod_namespace,
        node = %config.node_name,
        retain_results = ?config.retain_results,
        on_discovery_failure = ?config.on_discovery_failure,
        cycle_deadline_secs = ?config.cycle_deadline_secs,
        "port-scan-exporter configuration"
    );
    if config.node_name.is_empty() {
        warn!("node name is not set; discovery will only see pods with no node assigned");
    }

    let discovery = KubeDiscovery::from_env()
        .await
        .context("failed to create kubernetes client")?;
    let prober = ConnectProber::new(config.timeout());

    let store = SnapshotStore::new();
    let cycle = Arc::new(ScanCycle::new(
        Arc::new(discovery),
        Arc::new(prober),
        config.identity(),
        config.scan_settings()?,
        store.clone(),
    ));

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::spawn(cycle, config.interval(), cancel.clone());

    let state = AppState::new(store.clone(), Health::new(store, config.max_age()));
    let stop = cancel.clone();
    let served = server::serve(&config.listen, state, async move {
        tokio::select! {
            _ = shutdown_signal() => info!("shutdown requested"),
            _ = stop.cancelled() => {}
        }
    })
    .await;

    scheduler.shutdown().await;
    served
}

/// Resolves on Ctrl-C, or SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
