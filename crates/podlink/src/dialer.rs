//! Per-scheme stream dialers

use crate::proxy::ProxyDialer;
use async_trait::async_trait;
use podlink_ssh::SshTunnel;
#[cfg(feature = "overlay")]
use podlink_ssh::OverlayPeer;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::trace;

/// A bidirectional byte stream HTTP can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased stream returned by every dialer
pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens a fresh stream to the daemon.
///
/// Dialers are built once per connection and called once per request
/// attempt; the HTTP layer never sees which transport is underneath.
#[async_trait]
pub trait Dialer: Send + Sync + std::fmt::Debug {
    /// Open a new stream
    async fn dial(&self) -> io::Result<BoxedStream>;
}

/// Dials a local unix socket
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: PathBuf,
}

impl UnixDialer {
    /// Dialer for the socket at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Dialer for UnixDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        trace!("Dialing unix socket {}", self.path.display());
        Ok(Box::new(UnixStream::connect(&self.path).await?))
    }
}

/// Dials `host:port`, directly or through a proxy
#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
    proxy: Option<ProxyDialer>,
}

impl TcpDialer {
    /// Direct dialer
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            proxy: None,
        }
    }

    /// Route every dial through `proxy`
    pub fn with_proxy(mut self, proxy: ProxyDialer) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Target `host:port`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Configured proxy
    pub fn proxy(&self) -> Option<&ProxyDialer> {
        self.proxy.as_ref()
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        match &self.proxy {
            Some(proxy) => proxy.dial(&self.address).await,
            None => {
                trace!("Dialing tcp {}", self.address);
                Ok(Box::new(TcpStream::connect(&self.address).await?))
            }
        }
    }
}

/// Opens a channel to the remote socket over an established SSH session
#[derive(Debug)]
pub struct SshDialer {
    tunnel: SshTunnel,
}

impl SshDialer {
    /// Dialer over `tunnel`
    pub fn new(tunnel: SshTunnel) -> Self {
        Self { tunnel }
    }

    /// Remote socket path
    pub fn socket_path(&self) -> &str {
        self.tunnel.socket_path()
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        Ok(Box::new(self.tunnel.open().await?))
    }
}

/// SSH over an overlay-network stream.
///
/// Holds the overlay peer so the underlying stream stays open for as long
/// as the connection does.
#[cfg(feature = "overlay")]
#[derive(Debug)]
pub struct OverlayDialer {
    tunnel: SshTunnel,
    peer: OverlayPeer,
}

#[cfg(feature = "overlay")]
impl OverlayDialer {
    /// Dialer over `tunnel`, keeping `peer` alive
    pub fn new(tunnel: SshTunnel, peer: OverlayPeer) -> Self {
        Self { tunnel, peer }
    }

    /// The overlay peer carrying the session
    pub fn peer(&self) -> &OverlayPeer {
        &self.peer
    }
}

#[cfg(feature = "overlay")]
#[async_trait]
impl Dialer for OverlayDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        Ok(Box::new(self.tunnel.open().await?))
    }
}
