//! Connection-carrying client context

use crate::connection::Connection;
use semver::Version;
use std::sync::Arc;

/// What callers carry around once connected: the live connection and the
/// API version the daemon reported during the handshake
#[derive(Debug, Clone)]
pub struct ClientContext {
    connection: Arc<Connection>,
    version: Version,
}

impl ClientContext {
    /// Bind a handshaken connection to its service version
    pub fn new(connection: Connection, version: Version) -> Self {
        Self {
            connection: Arc::new(connection),
            version,
        }
    }

    /// The connection requests are dispatched on
    pub fn client(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    /// Daemon API version; 0.0.0 when the daemon did not report one
    pub fn service_version(&self) -> &Version {
        &self.version
    }
}
