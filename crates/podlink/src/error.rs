//! Error types for the podlink client

use podlink_ssh::TransportError;
use semver::Version;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Anything that kept a connection from being established.
///
/// Every transport and the version handshake report failures through this
/// one type so callers can match on "could not reach the daemon" without
/// caring which scheme was used.
#[derive(Debug, Error)]
#[error("unable to connect to Podman socket: {source}")]
pub struct ConnectError {
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl ConnectError {
    /// Wrap an underlying failure
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self { source: source.into() }
    }

    /// The wrapped failure
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Failures of the post-connect version probe
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The version header is present but not a version
    #[error("invalid Libpod-API-Version header {value:?}: {source}")]
    BadVersion {
        /// Header value as sent
        value: String,
        /// Parse failure
        #[source]
        source: semver::Error,
    },

    /// The server speaks an API older than this client supports
    #[error("server API version is too old. Client \"{client}\" server \"{server}\"")]
    TooOld {
        /// Minimum version the client accepts
        client: Version,
        /// Version the server reported
        server: Version,
    },

    /// The probe did not return 200
    #[error("ping response was {0}")]
    UnexpectedStatus(u16),
}

/// A single failed attempt to exchange a request with the daemon
#[derive(Debug, Error)]
pub enum SendError {
    /// The transport could not produce a stream
    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    /// HTTP exchange failed on an established stream
    #[error(transparent)]
    Http(#[from] hyper::Error),
}

/// Main error type for podlink operations
#[derive(Debug, Error)]
pub enum PodlinkError {
    /// The URI could not be parsed
    #[error("value of CONTAINER_HOST is not a valid url: {uri}: {source}")]
    InvalidUri {
        /// URI as given
        uri: String,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// The URI scheme has no transport
    #[error("unable to create connection. {0:?} is not a supported schema")]
    UnsupportedScheme(String),

    /// A tcp URI was not written as `tcp://...`
    #[error("tcp URIs should begin with tcp://")]
    MissingTcpPrefix,

    /// The proxy URI is unusable
    #[error("value of CONTAINER_PROXY is not a valid proxy: {uri}: {reason}")]
    InvalidProxy {
        /// Proxy URI as given
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// Connection could not be established
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Parameter resolution failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The version probe rejected the server
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The endpoint template does not fit the supplied path values
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Template as given
        endpoint: String,
        /// What went wrong
        reason: String,
    },

    /// The request could not be assembled
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// Every attempt to send the request failed
    #[error("request failed after {attempts} attempt(s): {source}")]
    Dispatch {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        source: SendError,
    },
}

impl PodlinkError {
    /// True when the daemon could not be reached at all
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}
