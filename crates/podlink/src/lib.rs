//! # Podlink
//!
//! Connection layer for remote container-daemon clients.
//!
//! A single service URI (`unix`, `tcp`, `ssh` or the experimental `p2p`)
//! is resolved into a [`Connection`] whose dialer opens a fresh stream per
//! request. The connection is admitted only after a version handshake, and
//! requests are dispatched over it with bounded retry into an
//! [`ApiResponse`] envelope.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use podlink_ssh as ssh;

/// Error types for the podlink client
pub mod error;

/// Client configuration and environment
pub mod config;

/// Service URI parsing
pub mod uri;

/// Per-scheme stream dialers
pub mod dialer;

/// Proxy traversal for tcp connections
pub mod proxy;

/// Scheme resolution and connection construction
pub mod connection;

/// Post-connect version handshake
pub mod handshake;

/// Request dispatch
pub mod request;

/// Response envelope
pub mod response;

/// Connection-carrying client context
pub mod context;

pub use config::{ApiVersions, ClientConfig, Environment, RetryPolicy};
pub use connection::{new_connection, new_connection_with_identity, Connection, Connector};
pub use context::ClientContext;
pub use dialer::{BoxedStream, Dialer};
pub use error::{ConnectError, HandshakeError, PodlinkError, SendError};
pub use request::RequestOptions;
pub use response::ApiResponse;
pub use uri::{join_url, Scheme, ServiceUri};

/// Result type alias for podlink operations
pub type Result<T> = std::result::Result<T, PodlinkError>;
