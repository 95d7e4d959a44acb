use crate::error::{Error, Result};
use crate::types::{PortState, Protocol, Target};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

/// Classifies a single (target, protocol, port) tuple.
///
/// Implementations must never panic and must fold every failure into
/// [`PortState::Closed`] or [`PortState::Error`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target, protocol: Protocol, port: u16) -> PortState;
}

/// Connect-only prober: a raw handshake with no application data exchanged.
#[derive(Debug, Clone, Copy)]
pub struct ConnectProber {
    timeout: Duration,
}

impl ConnectProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for ConnectProber {
    async fn probe(&self, target: &Target, protocol: Protocol, port: u16) -> PortState {
        probe(&target.ip, protocol, port, self.timeout).await
    }
}

/// Attempt one connection to `address:port` and classify the outcome.
///
/// - `Open`: the handshake completed; the socket is closed straight away.
/// - `Closed`: the remote actively refused the connection.
/// - `Error`: timeout, unreachable network, or an address that does not parse.
pub async fn probe(address: &str, protocol: Protocol, port: u16, timeout: Duration) -> PortState {
    let ip = match parse_address(address) {
        Ok(ip) => ip,
        Err(e) => {
            trace!(error = %e, port, "probe skipped");
            return PortState::Error;
        }
    };
    match protocol {
        Protocol::Tcp => probe_tcp(SocketAddr::new(ip, port), timeout).await,
    }
}

async fn probe_tcp(addr: SocketAddr, timeout: Duration) -> PortState {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            PortState::Open
        }
        Ok(Err(e)) => {
            let state = classify_connect_error(&e);
            trace!(%addr, error = %e, %state, "connect failed");
            state
        }
        Err(_) => {
            trace!(%addr, "connect timed out");
            PortState::Error
        }
    }
}

/// Map a failed connect to a port state. Only an explicit refusal counts as closed.
pub fn classify_connect_error(err: &io::Error) -> PortState {
    if err.kind() == io::ErrorKind::ConnectionRefused {
        PortState::Closed
    } else {
        PortState::Error
    }
}

pub fn parse_address(address: &str) -> Result<IpAddr> {
    address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn refused_is_closed_everything_else_is_error() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_connect_error(&refused), PortState::Closed);

        for kind in [
            io::ErrorKind::TimedOut,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::AddrNotAvailable,
            io::ErrorKind::Other,
        ] {
            assert_eq!(classify_connect_error(&io::Error::from(kind)), PortState::Error);
        }
    }

    #[test]
    fn empty_address_rejected() {
        assert!(parse_address("").is_err());
        assert!(parse_address("10.0.0.7").is_ok());
    }

    #[tokio::test]
    async fn empty_address_probes_as_error() {
        let state = probe("", Protocol::Tcp, 80, Duration::from_millis(50)).await;
        assert_eq!(state, PortState::Error);
    }

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = probe("127.0.0.1", Protocol::Tcp, port, Duration::from_secs(1)).await;
        assert_eq!(state, PortState::Open);
    }

    #[tokio::test]
    async fn unused_port_is_closed() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let state = probe("127.0.0.1", Protocol::Tcp, port, Duration::from_secs(1)).await;
        assert_eq!(state, PortState::Closed);
    }
}
