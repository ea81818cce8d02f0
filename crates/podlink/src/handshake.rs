//! Post-connect version handshake

use crate::connection::Connection;
use crate::request::RequestOptions;
use crate::uri::join_url;
use crate::{HandshakeError, Result};
use http::StatusCode;
use semver::Version;
use tracing::{debug, warn};

/// Response header carrying the daemon's API version
pub const VERSION_HEADER: &str = "Libpod-API-Version";

/// Probe the daemon and return the API version it reports.
///
/// Anything but a 200 is an error. A 200 without the version header is
/// accepted as version 0.0.0.
pub async fn ping(connection: &Connection) -> Result<Version> {
    let response = connection.do_request(RequestOptions::get(join_url(&["_ping"]))).await?;
    if response.status() != StatusCode::OK {
        return Err(HandshakeError::UnexpectedStatus(response.status().as_u16()).into());
    }

    let header = response
        .headers()
        .get(VERSION_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    Ok(check_version(header.as_deref(), &connection.api().minimal)?)
}

/// Validate a reported version against the oldest supported one
pub fn check_version(header: Option<&str>, minimal: &Version) -> std::result::Result<Version, HandshakeError> {
    let value = match header.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value,
        None => {
            warn!("Service did not provide Libpod-API-Version Header");
            return Ok(Version::new(0, 0, 0));
        }
    };

    let server = parse_tolerant(value).map_err(|source| HandshakeError::BadVersion {
        value: value.to_string(),
        source,
    })?;
    if server < *minimal {
        return Err(HandshakeError::TooOld {
            client: minimal.clone(),
            server,
        });
    }
    debug!("Service API version {}", server);
    Ok(server)
}

/// Parse a version, accepting a leading `v` and missing minor or patch parts
pub fn parse_tolerant(value: &str) -> std::result::Result<Version, semver::Error> {
    let value = value.trim();
    let value = value.strip_prefix('v').unwrap_or(value);
    let parts = value.splitn(3, '.').count();
    if parts < 3 && !value.contains(['-', '+']) {
        return Version::parse(&format!("{}{}", value, ".0".repeat(3 - parts)));
    }
    Version::parse(value)
}
