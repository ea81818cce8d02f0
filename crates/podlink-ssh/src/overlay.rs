//! Overlay-network tunnel
//!
//! Joins the libp2p network as a dial-only peer, reaches the rendezvous peer
//! through a circuit relay and opens one application stream to it. The SSH
//! client is then run on top of that stream.

use crate::options::OverlayConfig;
use crate::TransportError;
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, noise, ping, relay, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};
use tracing::{debug, info, warn};

#[derive(NetworkBehaviour)]
struct OverlayBehaviour {
    relay: relay::client::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
    stream: libp2p_stream::Behaviour,
}

/// Address of one end of an overlay stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayAddr(Multiaddr);

impl OverlayAddr {
    /// Address family, always the overlay network
    pub fn network(&self) -> &'static str {
        "libp2p"
    }

    /// Underlying multiaddr
    pub fn multiaddr(&self) -> &Multiaddr {
        &self.0
    }
}

impl fmt::Display for OverlayAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An application stream with socket-like accessors
pub struct OverlayStream {
    inner: Compat<libp2p::Stream>,
    local: OverlayAddr,
    remote: OverlayAddr,
}

impl OverlayStream {
    /// Our end of the stream
    pub fn local_addr(&self) -> &OverlayAddr {
        &self.local
    }

    /// The rendezvous peer's end, as reached through the relay
    pub fn peer_addr(&self) -> &OverlayAddr {
        &self.remote
    }

    /// Accepted for socket parity; overlay streams carry no deadlines
    pub fn set_deadline(&self, _deadline: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for OverlayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayStream")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

impl AsyncRead for OverlayStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for OverlayStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Keeps the overlay peer running for as long as the tunnel is in use
pub struct OverlayPeer {
    peer_id: PeerId,
    driver: JoinHandle<()>,
}

impl OverlayPeer {
    /// Our identity on the overlay network
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl fmt::Debug for OverlayPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayPeer").field("peer_id", &self.peer_id).finish()
    }
}

impl Drop for OverlayPeer {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Relay and rendezvous targets parsed from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayTargets {
    /// Full relay address
    pub relay: Multiaddr,
    /// Peer id carried by the relay address
    pub relay_peer: PeerId,
    /// Rendezvous peer id
    pub rendezvous: PeerId,
    /// Stream protocol
    pub protocol: StreamProtocol,
}

impl OverlayTargets {
    /// Validate the configured addresses
    pub fn from_config(config: &OverlayConfig) -> Result<Self, TransportError> {
        let relay: Multiaddr = config
            .relay
            .parse()
            .map_err(|e| TransportError::Configuration(format!("invalid relay address {}: {}", config.relay, e)))?;
        let relay_peer = match relay.iter().last() {
            Some(Protocol::P2p(peer)) => peer,
            _ => {
                return Err(TransportError::Configuration(format!(
                    "relay address {} does not end in /p2p/<peer id>",
                    config.relay
                )))
            }
        };
        let rendezvous: PeerId = config.rendezvous.parse().map_err(|e| {
            TransportError::Configuration(format!("invalid rendezvous peer {}: {}", config.rendezvous, e))
        })?;
        let protocol = StreamProtocol::try_from_owned(config.protocol.clone())
            .map_err(|e| TransportError::Configuration(format!("invalid protocol {}: {}", config.protocol, e)))?;

        Ok(Self {
            relay,
            relay_peer,
            rendezvous,
            protocol,
        })
    }

    /// Circuit address that reaches the rendezvous peer through the relay
    pub fn circuit(&self) -> Multiaddr {
        self.relay
            .clone()
            .with(Protocol::P2pCircuit)
            .with(Protocol::P2p(self.rendezvous))
    }
}

fn overlay_error(e: impl fmt::Display) -> TransportError {
    TransportError::Overlay(e.to_string())
}

/// Join the overlay and open a stream to the rendezvous peer
pub async fn open_stream(config: &OverlayConfig) -> Result<(OverlayStream, OverlayPeer), TransportError> {
    let targets = OverlayTargets::from_config(config)?;
    let agent = config.agent.clone();

    let mut swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
        .map_err(overlay_error)?
        .with_dns()
        .map_err(overlay_error)?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(overlay_error)?
        .with_behaviour(|key, relay| OverlayBehaviour {
            relay,
            identify: identify::Behaviour::new(
                identify::Config::new("/ipfs/id/1.0.0".to_string(), key.public()).with_agent_version(agent),
            ),
            ping: ping::Behaviour::new(ping::Config::new()),
            stream: libp2p_stream::Behaviour::new(),
        })
        .map_err(overlay_error)?
        .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_timeout))
        .build();

    let local_peer = *swarm.local_peer_id();
    info!("Peer ID: {}", local_peer);

    swarm.dial(targets.relay.clone()).map_err(overlay_error)?;
    let relay_peer = targets.relay_peer;
    drive_until(&mut swarm, config.probe_timeout, |event| match event {
        SwarmEvent::ConnectionEstablished { peer_id, .. } if peer_id == relay_peer => Some(Ok(())),
        SwarmEvent::OutgoingConnectionError {
            peer_id: Some(peer_id),
            error,
            ..
        } if peer_id == relay_peer => Some(Err(overlay_error(format!("failed to reach relay: {}", error)))),
        _ => None,
    })
    .await?;
    info!("Connected to relay {}", targets.relay);

    // A direct dial to the rendezvous peer is expected to have failed
    // already; redial regardless of any existing connection state.
    let circuit = targets.circuit();
    debug!("Dialing rendezvous peer via {}", circuit);
    swarm
        .dial(
            DialOpts::peer_id(targets.rendezvous)
                .addresses(vec![circuit.clone()])
                .condition(PeerCondition::Always)
                .build(),
        )
        .map_err(overlay_error)?;

    let rendezvous = targets.rendezvous;
    let rtt = drive_until(&mut swarm, config.probe_timeout, |event| match event {
        SwarmEvent::Behaviour(OverlayBehaviourEvent::Ping(ping::Event { peer, result, .. })) if peer == rendezvous => {
            Some(result.map_err(|e| overlay_error(format!("ping error: {}", e))))
        }
        SwarmEvent::OutgoingConnectionError {
            peer_id: Some(peer_id),
            error,
            ..
        } if peer_id == rendezvous => Some(Err(overlay_error(format!(
            "failed to reach rendezvous peer: {}",
            error
        )))),
        _ => None,
    })
    .await?;
    info!("ping RTT: {:?}", rtt);

    let mut control = swarm.behaviour().stream.new_control();
    let driver = tokio::spawn(drive(swarm, relay_peer, rendezvous));
    let peer = OverlayPeer {
        peer_id: local_peer,
        driver,
    };

    let stream = control
        .open_stream(rendezvous, targets.protocol.clone())
        .await
        .map_err(|e| overlay_error(format!("failed to open stream: {}", e)))?;

    let stream = OverlayStream {
        inner: stream.compat(),
        local: OverlayAddr(Multiaddr::empty().with(Protocol::P2p(local_peer))),
        remote: OverlayAddr(circuit),
    };
    Ok((stream, peer))
}

async fn drive_until<T>(
    swarm: &mut Swarm<OverlayBehaviour>,
    limit: Duration,
    mut pick: impl FnMut(SwarmEvent<OverlayBehaviourEvent>) -> Option<Result<T, TransportError>>,
) -> Result<T, TransportError> {
    let wait = async {
        loop {
            let event = swarm.select_next_some().await;
            if let Some(outcome) = pick(event) {
                return outcome;
            }
        }
    };
    timeout(limit, wait).await.map_err(|_| TransportError::Timeout)?
}

async fn drive(mut swarm: Swarm<OverlayBehaviour>, relay_peer: PeerId, rendezvous: PeerId) {
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!("Connected via relay: {}", endpoint.get_remote_address());
                debug!("Connection established with {}", peer_id);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } if peer_id == relay_peer => {
                warn!("Lost connection to relay {}", relay_peer);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } if peer_id == rendezvous => {
                warn!("Lost connection to rendezvous peer {}", rendezvous);
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Ping(ping::Event { peer, result, .. })) => {
                if let Err(e) = result {
                    debug!("Ping to {} failed: {}", peer, e);
                }
            }
            _ => {}
        }
    }
}
