//! # Podlink SSH Transport
//!
//! SSH and overlay-network tunnels used by the podlink daemon client.

#![warn(missing_docs)]

/// OpenSSH client configuration lookup
pub mod ssh_config;

/// Connection parameter resolution
pub mod params;

/// Authenticated SSH sessions
pub mod session;

/// Per-request socket tunnels
pub mod tunnel;

/// Tunnel configuration
pub mod options;

/// Overlay-network tunnel
#[cfg(feature = "overlay")]
pub mod overlay;

/// SSH-specific error types
pub mod error;

pub use error::TransportError;
pub use options::{OverlayConfig, SshOptions, REMOTE_SOCKET_COMMAND};
pub use params::{ConnectionParams, ParamRequest};
pub use session::{discover_socket_path, HostKeyPolicy, RemoteShell, SshSession};
pub use ssh_config::{SshConfigFile, SshSettings};
pub use tunnel::{BoxedChannel, ChannelOpener, SshTunnel, TunnelChannel};

#[cfg(feature = "overlay")]
pub use overlay::{OverlayAddr, OverlayPeer, OverlayStream};
