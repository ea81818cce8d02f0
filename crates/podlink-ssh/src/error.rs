//! SSH- and overlay-specific error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// SSH connection error
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server's host key could not be verified
    #[error("host key verification failed for {host}: {reason}")]
    HostKey {
        /// Host whose key was checked
        host: String,
        /// Why verification failed
        reason: String,
    },

    /// The local account could not be looked up
    #[error("current user could not be determined: {0}")]
    CurrentUser(String),

    /// The local home directory could not be located
    #[error("failed to find home dir")]
    HomeDir,

    /// A port value from the ssh configuration is not numeric
    #[error("port is not an int: {value}")]
    InvalidPort {
        /// Offending value
        value: String,
    },

    /// The identity file cannot be read
    #[error("identity file {path:?} is not readable: {source}")]
    Identity {
        /// Path of the identity file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Overlay network error
    #[error("overlay network error: {0}")]
    Overlay(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote command failed
    #[error("Remote command failed with exit code {code}: {message}")]
    CommandFailed {
        /// Exit code of the failed command
        code: i32,
        /// Error message
        message: String,
    },
}

impl From<ssh2::Error> for TransportError {
    fn from(err: ssh2::Error) -> Self {
        Self::Connection(err.to_string())
    }
}
