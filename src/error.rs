use thiserror::Error;

/// Errors surfaced by the scan engine's collaborators.
///
/// None of these abort a scan cycle: they are logged and folded into the
/// snapshot that the cycle publishes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("target discovery failed: {0}")]
    Discovery(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("concurrency limiter closed")]
    LimiterClosed,

    #[error("invalid target address: {0:?}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, Error>;
