//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Command run on the remote host to learn where the daemon listens
pub const REMOTE_SOCKET_COMMAND: &str = "podman info --format '{{.Host.RemoteSocket.Path}}'";

/// SSH-side options shared by the ssh and p2p transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOptions {
    /// Client configuration files, consulted in order
    pub config_files: Vec<PathBuf>,
    /// `known_hosts` file used to verify server keys
    pub known_hosts: Option<PathBuf>,
    /// TCP connect timeout for direct ssh connections
    pub connect_timeout: Duration,
    /// Command whose stdout names the remote daemon socket
    pub socket_command: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        let home = dirs::home_dir();
        let mut config_files = Vec::new();
        if let Some(home) = &home {
            config_files.push(home.join(".ssh").join("config"));
        }
        config_files.push(PathBuf::from("/etc/ssh/ssh_config"));

        Self {
            config_files,
            known_hosts: home.map(|h| h.join(".ssh").join("known_hosts")),
            connect_timeout: Duration::from_secs(30),
            socket_command: REMOTE_SOCKET_COMMAND.to_string(),
        }
    }
}

/// Where the overlay tunnel goes and how it gets there.
///
/// The defaults point at the public relay and rendezvous peer the p2p
/// transport was first deployed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Relay multiaddr, terminated by `/p2p/<relay peer id>`
    pub relay: String,
    /// Peer id of the rendezvous peer fronting the daemon host
    pub rendezvous: String,
    /// Application protocol spoken on the stream
    pub protocol: String,
    /// Agent string advertised through identify
    pub agent: String,
    /// Bound on relay connection and the liveness ping
    pub probe_timeout: Duration,
    /// How long an idle connection to the rendezvous peer survives
    pub idle_timeout: Duration,
    /// SSH user on the far side; the resolved user when unset
    pub remote_user: Option<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            relay: "/ip4/64.176.227.5/tcp/4001/p2p/12D3KooWLzi9E1oaHLhWrgTPnPa3aUjNkM8vvC8nYZp1gk9RjTV1"
                .to_string(),
            rendezvous: "12D3KooWJJqoWuC2CVAuUfEfdLHguh1bPbKsLwQY4SoC2Vw695ry".to_string(),
            protocol: "/p2pdao/libp2p-ssh/1.0.0".to_string(),
            agent: "p2pdao.libp2p-proxy".to_string(),
            probe_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60 * 60),
            remote_user: None,
        }
    }
}
