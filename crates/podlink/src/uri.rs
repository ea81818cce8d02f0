//! Service URI parsing and normalisation

use crate::{PodlinkError, Result};
use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

/// Transports a service URI can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Local unix socket
    Unix,
    /// Plain TCP, optionally through a proxy
    Tcp,
    /// Remote unix socket through an SSH session
    Ssh,
    /// SSH over an overlay-network stream (experimental)
    P2p,
}

impl Scheme {
    /// Scheme as written in a URI
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Tcp => "tcp",
            Self::Ssh => "ssh",
            Self::P2p => "p2p",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, normalised service URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUri {
    scheme: Scheme,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
}

impl ServiceUri {
    /// Parse and normalise `raw`.
    ///
    /// `unix://run/x.sock` and `unix:///run/x.sock` name the same socket.
    /// `tcp` URIs must literally start with `tcp://`. For `ssh` and `p2p`
    /// a bare `/` path means "ask the daemon".
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|source| PodlinkError::InvalidUri {
            uri: raw.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "unix" => Scheme::Unix,
            "tcp" => Scheme::Tcp,
            "ssh" => Scheme::Ssh,
            "p2p" => Scheme::P2p,
            other => return Err(PodlinkError::UnsupportedScheme(other.to_string())),
        };

        let user = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(|u| percent_decode_str(u).decode_utf8_lossy().into_owned());
        let mut host = url.host_str().unwrap_or_default().to_string();
        let mut path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();

        match scheme {
            Scheme::Unix => {
                if !raw.starts_with("unix:///") && !host.is_empty() {
                    path = format!("/{}{}", host, path);
                }
                host.clear();
            }
            Scheme::Tcp => {
                if !raw.starts_with("tcp://") {
                    return Err(PodlinkError::MissingTcpPrefix);
                }
            }
            Scheme::Ssh | Scheme::P2p => {
                if path == "/" {
                    path.clear();
                }
            }
        }

        Ok(Self {
            scheme,
            user,
            host,
            port: url.port(),
            path,
        })
    }

    /// Selected transport
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// User embedded in the URI
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Host as written, IPv6 literals keep their brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host without IPv6 brackets
    pub fn hostname(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Explicit port
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host[:port]`
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Socket path (unix, ssh, p2p) or path prefix (tcp)
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }
}

impl fmt::Display for ServiceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}{}", self.authority(), self.path)
    }
}

/// Join path elements with `/` behind a leading `/`
pub fn join_url(elements: &[&str]) -> String {
    format!("/{}", elements.join("/"))
}
