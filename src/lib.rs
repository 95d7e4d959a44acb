//! Library crate for port-scan-exporter: the scan engine and its read side.
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod histogram;
pub mod kubernetes;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod ports;
pub mod prober;
pub mod scanner;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
