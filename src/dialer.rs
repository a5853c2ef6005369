//! Single TCP liveness probe, direct or through a SOCKS5 proxy.
//!
//! Every failure mode (refusal, timeout, OS error, proxy handshake error)
//! collapses into `false`; nothing propagates past this boundary.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::trace;

use crate::error::{Error, Result};
use crate::proxy::{ProxyConfig, ProxyKind};

/// Something that can tell whether an (address, port) pair accepts connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str, port: u16) -> bool;
}

/// The production [`Connector`]: a full TCP handshake bounded by a timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
    proxy: Option<ProxyConfig>,
}

impl TcpDialer {
    pub fn new(timeout: Duration, proxy: Option<ProxyConfig>) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::Configuration("probe timeout must be > 0".into()));
        }
        Ok(Self { timeout, proxy })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }
}

#[async_trait]
impl Connector for TcpDialer {
    async fn connect(&self, address: &str, port: u16) -> bool {
        dial(address, port, self.timeout, self.proxy.as_ref()).await
    }
}

/// Open a connection to `address:port` and close it again.
///
/// Returns `true` only if the handshake (and the proxy negotiation, when a
/// proxy is given) finished within `limit`. The connection is shut down before
/// returning; shutdown errors are ignored.
pub async fn dial(address: &str, port: u16, limit: Duration, proxy: Option<&ProxyConfig>) -> bool {
    if address.trim().is_empty() || port == 0 || limit.is_zero() {
        trace!(address, port, "rejecting invalid probe");
        return false;
    }

    let outcome = match proxy {
        None => timeout(limit, dial_direct(address, port)).await,
        Some(p) => match p.kind {
            ProxyKind::Socks5 => timeout(limit, dial_socks5(p, address, port)).await,
        },
    };

    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(reason)) => {
            trace!(address, port, %reason, "connect failed");
            false
        }
        Err(_) => {
            trace!(address, port, "connect timed out");
            false
        }
    }
}

async fn dial_direct(address: &str, port: u16) -> std::result::Result<(), String> {
    let mut stream = TcpStream::connect((address, port))
        .await
        .map_err(|e| e.to_string())?;
    let _ = stream.shutdown().await;
    Ok(())
}

async fn dial_socks5(proxy: &ProxyConfig, address: &str, port: u16) -> std::result::Result<(), String> {
    let proxy_addr = proxy.authority();
    let mut stream = Socks5Stream::connect(proxy_addr.as_str(), (address, port))
        .await
        .map_err(|e| e.to_string())?;
    let _ = stream.shutdown().await;
    Ok(())
}
