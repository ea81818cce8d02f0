//! Connection parameter resolution
//!
//! Both tunnelled transports (plain ssh and ssh-over-overlay) learn the same
//! four values before dialing: user, hostname, port and identity file. Each
//! comes from the URI when present, then from the ssh client configuration,
//! then from the operating system.

use crate::ssh_config::{SshSettings, DEFAULT_PORT};
use crate::TransportError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the URI (and caller) already know about the target
#[derive(Debug, Clone, Default)]
pub struct ParamRequest<'a> {
    /// Hostname from the URI; doubles as the ssh_config alias
    pub host: &'a str,
    /// User info embedded in the URI
    pub user: Option<&'a str>,
    /// Port embedded in the URI
    pub port: Option<u16>,
    /// Identity passed explicitly or through the environment
    pub identity: Option<&'a Path>,
    /// Machine-managed connections skip ssh_config entirely
    pub machine: bool,
}

/// Fully resolved parameters for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Remote user
    pub user: String,
    /// Host actually dialed
    pub hostname: String,
    /// Remote ssh port
    pub port: u16,
    /// Private key, if any; the ssh agent is used otherwise
    pub identity: Option<PathBuf>,
}

/// Resolve parameters, consulting `settings` unless the request is for a machine
pub fn resolve(request: &ParamRequest<'_>, settings: &SshSettings) -> Result<ConnectionParams, TransportError> {
    let alias = request.host;
    let mut found = false;

    let mut user = request.user.filter(|u| !u.is_empty()).map(str::to_string);
    let mut hostname = alias.to_string();
    let mut port = request.port;
    let mut identity = match request.identity {
        Some(path) => Some(expand_home(&path.to_string_lossy())?),
        None => None,
    };

    if !request.machine {
        if user.is_none() {
            if let Some(val) = settings.get(alias, "User") {
                user = Some(val.to_string());
                found = true;
            }
        }

        if let Some(val) = settings.get(alias, "Hostname") {
            hostname = val.to_string();
            found = true;
        }

        if port.is_none() {
            if let Some(val) = settings.get(alias, "Port").filter(|v| *v != DEFAULT_PORT) {
                port = Some(val.parse().map_err(|_| TransportError::InvalidPort {
                    value: val.to_string(),
                })?);
                found = true;
            }
        }

        if identity.is_none() {
            if let Some(val) = settings.get(alias, "IdentityFile") {
                identity = Some(expand_home(val.trim_matches('"'))?);
                found = true;
            }
        }
    }

    let user = match user {
        Some(user) => user,
        None => current_user()?,
    };
    let params = ConnectionParams {
        user,
        hostname,
        port: port.unwrap_or(22),
        identity,
    };

    if found {
        debug!("ssh_config alias found: {}", alias);
        debug!("  User: {}", params.user);
        debug!("  Hostname: {}", params.hostname);
        debug!("  Port: {}", params.port);
        debug!("  IdentityFile: {:?}", params.identity);
    }

    Ok(params)
}

/// Expand a leading `~/` to the current user's home directory
pub fn expand_home(path: &str) -> Result<PathBuf, TransportError> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().ok_or(TransportError::HomeDir)?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Name of the account running this process
pub fn current_user() -> Result<String, TransportError> {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(TransportError::CurrentUser(format!("no passwd entry for uid {}", uid))),
        Err(e) => Err(TransportError::CurrentUser(e.to_string())),
    }
}
