//! Unit tests for scheme resolution

use super::*;
use crate::proxy::ProxyKind;
use crate::PodlinkError;
use std::time::Duration;

fn connector(env: Environment) -> Connector {
    Connector::new(ClientConfig::default()).with_environment(env)
}

#[tokio::test]
async fn test_unix_forms_resolve_to_same_path() {
    let connector = connector(Environment::default());
    for uri in ["unix:///run/podman/podman.sock", "unix://run/podman/podman.sock"] {
        let conn = connector.resolve(uri, None, false).await.unwrap();
        assert_eq!(conn.uri().scheme(), Scheme::Unix);
        assert_eq!(conn.uri().path(), "/run/podman/podman.sock");
        assert!(format!("{:?}", conn).contains("/run/podman/podman.sock"));
    }
}

#[tokio::test]
async fn test_empty_uri_uses_environment() {
    let env = Environment {
        host: Some("unix:///tmp/podman.sock".to_string()),
        ..Default::default()
    };
    let conn = connector(env).resolve("", None, false).await.unwrap();
    assert_eq!(conn.uri().path(), "/tmp/podman.sock");
}

#[tokio::test]
async fn test_explicit_uri_beats_environment() {
    let env = Environment {
        host: Some("unix:///tmp/podman.sock".to_string()),
        ..Default::default()
    };
    let conn = connector(env).resolve("unix:///run/other.sock", None, false).await.unwrap();
    assert_eq!(conn.uri().path(), "/run/other.sock");
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let err = connector(Environment::default())
        .resolve("http://localhost:8080", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, PodlinkError::UnsupportedScheme(_)));
    assert!(!err.is_connect_error());
}

#[tokio::test]
async fn test_tcp_without_proxy() {
    let conn = connector(Environment::default())
        .resolve("tcp://localhost:8080", None, false)
        .await
        .unwrap();
    assert_eq!(conn.uri().authority(), "localhost:8080");
}

#[test]
fn test_tcp_proxy_selection() {
    let env = Environment {
        proxy: Some("socks5://127.0.0.1:1080".to_string()),
        ..Default::default()
    };
    let uri = ServiceUri::parse("tcp://proxyhost").unwrap();
    let dialer = connector(env).tcp_dialer(&uri).unwrap();
    let proxy = dialer.proxy().unwrap();
    assert_eq!(proxy.kind(), ProxyKind::Socks5);
    assert_eq!(proxy.dial_timeout(), Some(Duration::from_secs(3)));

    let env = Environment {
        proxy: Some("http://127.0.0.1:3128".to_string()),
        ..Default::default()
    };
    let dialer = connector(env).tcp_dialer(&uri).unwrap();
    assert_eq!(dialer.proxy().unwrap().dial_timeout(), None);
}

#[test]
fn test_invalid_proxy_rejected() {
    let env = Environment {
        proxy: Some("gopher://proxy".to_string()),
        ..Default::default()
    };
    let uri = ServiceUri::parse("tcp://localhost:8080").unwrap();
    let err = connector(env).tcp_dialer(&uri).unwrap_err();
    assert!(err.is_connect_error(), "unexpected error: {}", err);
    let PodlinkError::Connect(connect) = err else {
        unreachable!()
    };
    assert!(matches!(
        connect.inner().downcast_ref::<PodlinkError>(),
        Some(PodlinkError::InvalidProxy { .. })
    ));
}

#[tokio::test]
async fn test_tcp_with_proxy_builds() {
    let env = Environment {
        proxy: Some("socks5://127.0.0.1:1080".to_string()),
        ..Default::default()
    };
    let conn = connector(env).resolve("tcp://proxyhost", None, false).await.unwrap();
    assert_eq!(conn.uri().host(), "proxyhost");

    let env = Environment {
        proxy: Some("http://127.0.0.1:3128".to_string()),
        ..Default::default()
    };
    let conn = connector(env).resolve("tcp://proxyhost:8080", None, false).await.unwrap();
    assert_eq!(conn.uri().authority(), "proxyhost:8080");
}

#[tokio::test]
async fn test_bad_proxy_fails_connect() {
    let env = Environment {
        proxy: Some("ftp://proxy".to_string()),
        ..Default::default()
    };
    let err = connector(env)
        .connect("tcp://localhost:8080", None, false)
        .await
        .unwrap_err();
    assert!(err.is_connect_error());
    assert!(err.to_string().contains("ftp"), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_ssh_unreachable_is_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let uri = format!("ssh://core@127.0.0.1:{}/run/podman/podman.sock", port);
    let err = connector(Environment::default())
        .resolve(&uri, None, true)
        .await
        .unwrap_err();
    assert!(err.is_connect_error(), "unexpected error: {}", err);
    assert!(err.to_string().starts_with("unable to connect to Podman socket: "));
}

#[tokio::test]
async fn test_unix_handshake_failure_is_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("unix://{}", dir.path().join("absent.sock").display());
    let err = connector(Environment::default())
        .connect(&uri, None, false)
        .await
        .unwrap_err();
    assert!(err.is_connect_error());
}

#[test]
fn test_machine_connections_skip_host_keys() {
    let connector = connector(Environment::default());
    assert_eq!(connector.host_key_policy(true), HostKeyPolicy::Insecure);
}

/// Answers the socket introspection command with canned stdout
#[derive(Default)]
struct ScriptedShell {
    stdout: String,
    commands: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&self, command: &str) -> std::result::Result<String, podlink_ssh::TransportError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self.stdout.clone())
    }
}

#[test]
fn test_empty_ssh_path_filled_from_stdout() {
    let shell = ScriptedShell {
        stdout: "/run/user/1000/podman/podman.sock\n".to_string(),
        ..Default::default()
    };
    let connector = connector(Environment::default());
    let mut uri = ServiceUri::parse("ssh://core@example.com/").unwrap();
    assert_eq!(uri.path(), "");

    tokio_test::block_on(connector.fill_socket_path(&shell, &mut uri)).unwrap();
    assert_eq!(uri.path(), "/run/user/1000/podman/podman.sock");
    assert_eq!(
        *shell.commands.lock().unwrap(),
        vec![connector.config().ssh.socket_command.clone()]
    );
}

#[test]
fn test_explicit_ssh_path_skips_discovery() {
    let shell = ScriptedShell::default();
    let mut uri = ServiceUri::parse("ssh://core@example.com/run/podman/podman.sock").unwrap();

    tokio_test::block_on(connector(Environment::default()).fill_socket_path(&shell, &mut uri)).unwrap();
    assert_eq!(uri.path(), "/run/podman/podman.sock");
    assert!(shell.commands.lock().unwrap().is_empty());
}

#[test]
fn test_silent_discovery_is_connect_error() {
    let shell = ScriptedShell {
        stdout: "\n".to_string(),
        ..Default::default()
    };
    let mut uri = ServiceUri::parse("ssh://core@example.com").unwrap();

    let err = tokio_test::block_on(connector(Environment::default()).fill_socket_path(&shell, &mut uri)).unwrap_err();
    assert!(err.is_connect_error(), "unexpected error: {}", err);
    assert_eq!(uri.path(), "");
}
