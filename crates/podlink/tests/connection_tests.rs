//! End-to-end tests against a scripted daemon on a unix socket

mod integration;

use anyhow::Result;
use integration::{PingReply, ScriptedDaemon};
use podlink::{ClientConfig, Connector, Environment, RequestOptions};
use semver::Version;
use tokio::io::AsyncWriteExt;

fn connector() -> Connector {
    Connector::new(ClientConfig::default()).with_environment(Environment::default())
}

/// Handshake reporting 5.2.0 against a 4.0.0 minimum
#[tokio::test]
async fn test_handshake_reports_service_version() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("5.2.0")).await?;

    let ctx = connector().connect(&daemon.uri(), None, false).await?;
    assert_eq!(ctx.service_version(), &Version::new(5, 2, 0));
    assert_eq!(
        daemon.request_lines(),
        vec!["GET /v5.3.0/libpod/_ping HTTP/1.1".to_string()]
    );
    Ok(())
}

/// Two-slash unix URIs reach the same socket
#[tokio::test]
async fn test_two_slash_unix_uri() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("5.0.0")).await?;
    let uri = daemon.uri().replacen("unix:///", "unix://", 1);

    let ctx = connector().connect(&uri, None, false).await?;
    assert_eq!(ctx.service_version(), &Version::new(5, 0, 0));
    Ok(())
}

/// A 200 without the version header yields the zero version
#[tokio::test]
async fn test_missing_version_header() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::without_version()).await?;

    let ctx = connector().connect(&daemon.uri(), None, false).await?;
    assert_eq!(ctx.service_version(), &Version::new(0, 0, 0));
    Ok(())
}

#[tokio::test]
async fn test_old_server_rejected() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("3.4.4")).await?;

    let err = connector().connect(&daemon.uri(), None, false).await.unwrap_err();
    assert!(err.is_connect_error());
    assert_eq!(
        err.to_string(),
        "unable to connect to Podman socket: server API version is too old. Client \"4.0.0\" server \"3.4.4\""
    );
    Ok(())
}

#[tokio::test]
async fn test_malformed_version_rejected() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("not-a-version")).await?;

    let err = connector().connect(&daemon.uri(), None, false).await.unwrap_err();
    assert!(err.is_connect_error());
    Ok(())
}

#[tokio::test]
async fn test_failed_ping_rejected() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::status(503)).await?;

    let err = connector().connect(&daemon.uri(), None, false).await.unwrap_err();
    assert!(err.is_connect_error());
    assert!(err.to_string().ends_with("ping response was 503"));
    Ok(())
}

/// Path values with `/` and spaces arrive escaped and decode back
#[tokio::test]
async fn test_path_values_round_trip() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("5.2.0")).await?;
    let ctx = connector().connect(&daemon.uri(), None, false).await?;

    let response = ctx
        .client()
        .do_request(RequestOptions::get("/containers/{}/json").path_value("web app/1"))
        .await?;
    assert!(response.is_success());
    let body = response.bytes().await?;
    assert_eq!(&body[..], b"/v5.3.0/libpod/containers/web app/1/json");

    let lines = daemon.request_lines();
    assert_eq!(lines[1], "GET /v5.3.0/libpod/containers/web%20app%2F1/json HTTP/1.1");
    Ok(())
}

/// Every request dials afresh
#[tokio::test]
async fn test_each_request_dials() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("5.2.0")).await?;
    let ctx = connector().connect(&daemon.uri(), None, false).await?;
    let client = ctx.client();

    client.do_request(RequestOptions::get("/info")).await?;
    client.do_request(RequestOptions::get("/info")).await?;
    assert_eq!(daemon.connections(), 3);
    Ok(())
}

#[tokio::test]
async fn test_raw_dial() -> Result<()> {
    let daemon = ScriptedDaemon::start(PingReply::ok("5.2.0")).await?;
    let ctx = connector().connect(&daemon.uri(), None, false).await?;

    let mut stream = ctx.client().dial().await?;
    stream.write_all(b"GET /v5.3.0/libpod/info HTTP/1.1\r\nHost: d\r\n\r\n").await?;
    stream.flush().await?;
    Ok(())
}
