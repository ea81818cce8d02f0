//! Scheme resolution and connection construction

use crate::config::{ApiVersions, ClientConfig, Environment, RetryPolicy};
use crate::context::ClientContext;
use crate::dialer::{BoxedStream, Dialer, SshDialer, TcpDialer, UnixDialer};
use crate::handshake;
use crate::proxy::ProxyDialer;
use crate::uri::{Scheme, ServiceUri};
use crate::{ConnectError, Result};
use podlink_ssh::params::{self, ParamRequest};
use podlink_ssh::{discover_socket_path, HostKeyPolicy, RemoteShell, SshSession, SshSettings, SshTunnel};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// A resolved service URI plus the capability to reach it
#[derive(Debug)]
pub struct Connection {
    pub(crate) uri: ServiceUri,
    pub(crate) dialer: Box<dyn Dialer>,
    pub(crate) api: ApiVersions,
    pub(crate) retry: RetryPolicy,
}

impl Connection {
    /// Assemble a connection from an already built dialer; the caller
    /// still owes it a handshake
    pub(crate) fn new(uri: ServiceUri, dialer: Box<dyn Dialer>, config: &ClientConfig) -> Self {
        Self {
            uri,
            dialer,
            api: config.api.clone(),
            retry: config.retry.clone(),
        }
    }

    /// The normalised URI; ssh and p2p paths are filled in by discovery
    pub fn uri(&self) -> &ServiceUri {
        &self.uri
    }

    /// API versions requests are made with
    pub fn api(&self) -> &ApiVersions {
        &self.api
    }

    /// Open a raw duplex stream to the daemon, bypassing HTTP
    pub async fn dial(&self) -> io::Result<BoxedStream> {
        self.dialer.dial().await
    }
}

/// Builds connections from service URIs
#[derive(Debug, Clone)]
pub struct Connector {
    config: ClientConfig,
    env: Environment,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Connector {
    /// Connector reading the process environment
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            env: Environment::from_process(),
        }
    }

    /// Replace the environment snapshot
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve, connect and run the version handshake.
    ///
    /// An empty `uri` falls back to `CONTAINER_HOST`, a missing `identity`
    /// to `CONTAINER_SSHKEY`. `machine` marks a pre-vetted machine-managed
    /// connection: ssh_config is not consulted and host keys are not checked.
    pub async fn connect(&self, uri: &str, identity: Option<&Path>, machine: bool) -> Result<ClientContext> {
        let connection = self.resolve(uri, identity, machine).await?;
        let version = handshake::ping(&connection).await.map_err(ConnectError::new)?;
        info!("Connected to {} (API {})", connection.uri(), version);
        Ok(ClientContext::new(connection, version))
    }

    /// Build a connection for `uri` without probing it
    pub(crate) async fn resolve(&self, uri: &str, identity: Option<&Path>, machine: bool) -> Result<Connection> {
        let raw = match (uri.is_empty(), &self.env.host) {
            (true, Some(host)) => host.as_str(),
            _ => uri,
        };
        let identity = identity.or(self.env.ssh_key.as_deref());

        let mut uri = ServiceUri::parse(raw)?;
        debug!("Resolving {} connection to {}", uri.scheme(), uri);

        let dialer: Box<dyn Dialer> = match uri.scheme() {
            Scheme::Unix => Box::new(UnixDialer::new(uri.path())),
            Scheme::Tcp => Box::new(self.tcp_dialer(&uri)?),
            Scheme::Ssh | Scheme::P2p => self.tunnel_dialer(&mut uri, identity, machine).await?,
        };

        Ok(Connection::new(uri, dialer, &self.config))
    }

    fn tcp_dialer(&self, uri: &ServiceUri) -> Result<TcpDialer> {
        let dialer = TcpDialer::new(uri.authority());
        match self.env.proxy.as_deref().filter(|p| !p.is_empty()) {
            Some(proxy) => {
                let proxy = ProxyDialer::from_uri(proxy, self.config.proxy_dial_timeout).map_err(ConnectError::new)?;
                Ok(dialer.with_proxy(proxy))
            }
            None => Ok(dialer),
        }
    }

    async fn tunnel_dialer(
        &self,
        uri: &mut ServiceUri,
        identity: Option<&Path>,
        machine: bool,
    ) -> Result<Box<dyn Dialer>> {
        let settings = if machine {
            SshSettings::default()
        } else {
            SshSettings::load(&self.config.ssh.config_files)
        };
        let params = params::resolve(
            &ParamRequest {
                host: uri.hostname(),
                user: uri.user(),
                port: uri.port(),
                identity,
                machine,
            },
            &settings,
        )?;

        match uri.scheme() {
            Scheme::Ssh => {
                let session = SshSession::connect(&params, self.host_key_policy(machine), self.config.ssh.connect_timeout)
                    .await
                    .map_err(ConnectError::new)?;
                let tunnel = self.open_tunnel(session, uri).await?;
                Ok(Box::new(SshDialer::new(tunnel)))
            }
            #[cfg(feature = "overlay")]
            Scheme::P2p => self.overlay_dialer(params, uri).await,
            #[cfg(not(feature = "overlay"))]
            Scheme::P2p => Err(crate::PodlinkError::UnsupportedScheme(Scheme::P2p.to_string())),
            Scheme::Unix | Scheme::Tcp => Err(crate::PodlinkError::UnsupportedScheme(uri.scheme().to_string())),
        }
    }

    #[cfg(feature = "overlay")]
    async fn overlay_dialer(
        &self,
        params: podlink_ssh::ConnectionParams,
        uri: &mut ServiceUri,
    ) -> Result<Box<dyn Dialer>> {
        use crate::dialer::OverlayDialer;
        use podlink_ssh::TransportError;

        let identity = params.identity.ok_or_else(|| {
            TransportError::Authentication("p2p connections require an identity file".to_string())
        })?;
        let user = self.config.overlay.remote_user.clone().unwrap_or(params.user);

        let (stream, peer) = podlink_ssh::overlay::open_stream(&self.config.overlay)
            .await
            .map_err(ConnectError::new)?;
        info!("Opened overlay stream {} -> {}", stream.local_addr(), stream.peer_addr());

        let session = SshSession::over_stream(stream, &user, &identity)
            .await
            .map_err(ConnectError::new)?;
        let tunnel = self.open_tunnel(session, uri).await?;
        Ok(Box::new(OverlayDialer::new(tunnel, peer)))
    }

    fn host_key_policy(&self, machine: bool) -> HostKeyPolicy {
        match (&self.config.ssh.known_hosts, machine) {
            (_, true) => HostKeyPolicy::Insecure,
            (Some(path), false) => HostKeyPolicy::KnownHosts(path.clone()),
            (None, false) => {
                warn!("No known_hosts file available, server host key will not be verified");
                HostKeyPolicy::Insecure
            }
        }
    }

    async fn open_tunnel(&self, session: SshSession, uri: &mut ServiceUri) -> Result<SshTunnel> {
        self.fill_socket_path(&session, uri).await?;
        Ok(session.into_tunnel(uri.path()))
    }

    /// Ask the daemon for its socket when the URI names none
    async fn fill_socket_path(&self, shell: &impl RemoteShell, uri: &mut ServiceUri) -> Result<()> {
        if uri.path().is_empty() {
            let path = discover_socket_path(shell, &self.config.ssh.socket_command)
                .await
                .map_err(ConnectError::new)?;
            debug!("Remote daemon socket on {}: {}", uri.hostname(), path);
            uri.set_path(path);
        }
        Ok(())
    }
}

/// Connect to `uri` with the default configuration
pub async fn new_connection(uri: &str) -> Result<ClientContext> {
    new_connection_with_identity(uri, None, false).await
}

/// Connect to `uri` with an explicit identity file
pub async fn new_connection_with_identity(
    uri: &str,
    identity: Option<&Path>,
    machine: bool,
) -> Result<ClientContext> {
    Connector::default().connect(uri, identity, machine).await
}

#[cfg(test)]
mod tests;
