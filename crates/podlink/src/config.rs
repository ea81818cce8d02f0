//! Client configuration

use podlink_ssh::{OverlayConfig, SshOptions};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the default service URI
pub const HOST_ENV: &str = "CONTAINER_HOST";
/// Environment variable naming the default SSH identity
pub const SSH_KEY_ENV: &str = "CONTAINER_SSHKEY";
/// Environment variable naming a proxy for tcp connections
pub const PROXY_ENV: &str = "CONTAINER_PROXY";

/// API versions this client speaks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiVersions {
    /// Version placed in request paths
    pub current: Version,
    /// Oldest server version accepted by the handshake
    pub minimal: Version,
}

impl Default for ApiVersions {
    fn default() -> Self {
        Self {
            current: Version::new(5, 3, 0),
            minimal: Version::new(4, 0, 0),
        }
    }
}

impl ApiVersions {
    /// `major.minor.patch` of the current version; servers reject pre-release suffixes
    pub fn path_segment(&self) -> String {
        format!("{}.{}.{}", self.current.major, self.current.minor, self.current.patch)
    }
}

/// Bounded retry for transport failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after attempt `n` is `backoff_step * n`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Pause after a failed `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Everything the connector needs besides the URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API versions
    pub api: ApiVersions,
    /// Request retry
    pub retry: RetryPolicy,
    /// Proxy dial timeout for proxies that honour one
    pub proxy_dial_timeout: Duration,
    /// SSH options
    pub ssh: SshOptions,
    /// Overlay network targets
    pub overlay: OverlayConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiVersions::default(),
            retry: RetryPolicy::default(),
            // The OS connect timeout is over a minute and every request is
            // attempted three times.
            proxy_dial_timeout: Duration::from_secs(3),
            ssh: SshOptions::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Override the API versions
    pub fn with_api(mut self, api: ApiVersions) -> Self {
        self.api = api;
        self
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the overlay targets
    pub fn with_overlay(mut self, overlay: OverlayConfig) -> Self {
        self.overlay = overlay;
        self
    }

    /// Override the SSH options
    pub fn with_ssh(mut self, ssh: SshOptions) -> Self {
        self.ssh = ssh;
        self
    }
}

/// Process environment the connector reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// `CONTAINER_HOST`
    pub host: Option<String>,
    /// `CONTAINER_SSHKEY`
    pub ssh_key: Option<PathBuf>,
    /// `CONTAINER_PROXY`
    pub proxy: Option<String>,
}

impl Environment {
    /// Snapshot the current process environment
    pub fn from_process() -> Self {
        Self {
            host: std::env::var(HOST_ENV).ok(),
            ssh_key: std::env::var_os(SSH_KEY_ENV).map(PathBuf::from),
            proxy: std::env::var(PROXY_ENV).ok(),
        }
    }
}
