//! Authenticated SSH sessions
//!
//! libssh2 is blocking, so every call that touches the wire runs on the
//! blocking thread pool. A session is set up in blocking mode, used for the
//! one-shot socket discovery command, and then handed to [`SshTunnel`],
//! which switches it to non-blocking mode for the lifetime of the connection.

use crate::params::ConnectionParams;
use crate::tunnel::{SshTunnel, POLL_INTERVAL};
use crate::TransportError;
use async_trait::async_trait;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the server's host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Require a matching entry in this known_hosts file
    KnownHosts(PathBuf),
    /// Accept any key; trust is established some other way
    Insecure,
}

/// An authenticated libssh2 session
pub struct SshSession {
    session: Session,
    target: String,
    /// Pumps bytes between a non-socket transport and the session's fd
    bridge: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession").field("target", &self.target).finish()
    }
}

impl SshSession {
    /// Dial `params.hostname:params.port` over TCP and authenticate
    pub async fn connect(
        params: &ConnectionParams,
        host_keys: HostKeyPolicy,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let params = params.clone();
        let target = format!("{}@{}:{}", params.user, params.hostname, params.port);
        info!("Connecting to {}", target);

        let session = blocking(move || {
            let tcp = dial_tcp(&params.hostname, params.port, connect_timeout)?;
            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.handshake()?;
            verify_host_key(&session, &params.hostname, params.port, &host_keys)?;
            authenticate(&session, &params.user, params.identity.as_deref())?;
            Ok(session)
        })
        .await?;

        info!("Successfully connected to {}", target);
        Ok(Self {
            session,
            target,
            bridge: None,
        })
    }

    /// Run an SSH client over an arbitrary duplex stream.
    ///
    /// libssh2 needs a file descriptor, so the stream is spliced onto one end
    /// of a socket pair by a background task. Host keys are not checked: the
    /// caller vouches for the peer.
    pub async fn over_stream<S>(stream: S, user: &str, identity: &Path) -> Result<Self, TransportError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (near, far) = tokio::net::UnixStream::pair()?;
        let bridge = tokio::spawn(splice(stream, near));

        let far: StdUnixStream = far.into_std()?;
        far.set_nonblocking(false)?;

        let user = user.to_string();
        let identity = identity.to_path_buf();
        let target = format!("{}@overlay", user);
        let result = blocking(move || {
            let mut session = Session::new()?;
            session.set_tcp_stream(far);
            session.handshake()?;
            authenticate(&session, &user, Some(&identity))?;
            Ok(session)
        })
        .await;

        match result {
            Ok(session) => Ok(Self {
                session,
                target,
                bridge: Some(bridge),
            }),
            Err(e) => {
                bridge.abort();
                Err(e)
            }
        }
    }

    /// Turn the session into a dialer for `socket_path`
    pub fn into_tunnel(mut self, socket_path: impl Into<String>) -> SshTunnel {
        self.session.set_blocking(false);
        let bridge = self.bridge.take();
        SshTunnel::new(self.session.clone(), socket_path.into(), self.target.clone(), bridge)
    }
}

/// Runs one-shot commands on the remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` and return its stdout; a non-zero exit is an error
    async fn run(&self, command: &str) -> Result<String, TransportError>;
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn run(&self, command: &str) -> Result<String, TransportError> {
        let session = self.session.clone();
        let command = command.to_string();
        debug!("Executing remote command on {}: {}", self.target, command);

        blocking(move || {
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            session.set_blocking(false);
            let output = drain_both(&mut channel.stream(0), &mut channel.stderr());
            session.set_blocking(true);
            let (stdout, stderr) = output?;

            channel.wait_close()?;
            let code = channel.exit_status()?;
            if code != 0 {
                return Err(TransportError::CommandFailed {
                    code,
                    message: String::from_utf8_lossy(&stderr).trim().to_string(),
                });
            }
            Ok(String::from_utf8_lossy(&stdout).into_owned())
        })
        .await
    }
}

/// Run the daemon's introspection `command` through `shell` and return the
/// socket path it printed
pub async fn discover_socket_path<S>(shell: &S, command: &str) -> Result<String, TransportError>
where
    S: RemoteShell + ?Sized,
{
    let output = shell.run(command).await?;
    let path = socket_path_from_output(&output);
    if path.is_empty() {
        return Err(TransportError::CommandFailed {
            code: 0,
            message: format!("{} printed no socket path", command),
        });
    }
    Ok(path.to_string())
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
    }
}

/// The daemon prints its socket path followed by a newline
pub fn socket_path_from_output(output: &str) -> &str {
    output.strip_suffix('\n').unwrap_or(output)
}

/// Read two non-blocking streams to EOF, taking from whichever has data.
///
/// A command that fills one stream while the other is still open must not
/// stall on the channel window.
fn drain_both<O: Read, E: Read>(stdout: &mut O, stderr: &mut E) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Drained::default();
    let mut err = Drained::default();
    let mut buf = [0u8; 8192];

    while !(out.done && err.done) {
        let progress = out.step(stdout, &mut buf)? | err.step(stderr, &mut buf)?;
        if !progress {
            thread::sleep(POLL_INTERVAL);
        }
    }
    Ok((out.data, err.data))
}

#[derive(Default)]
struct Drained {
    data: Vec<u8>,
    done: bool,
}

impl Drained {
    /// One non-blocking read; true when bytes arrived
    fn step<R: Read>(&mut self, stream: &mut R, buf: &mut [u8]) -> io::Result<bool> {
        if self.done {
            return Ok(false);
        }
        match stream.read(buf) {
            Ok(0) => self.done = true,
            Ok(n) => {
                self.data.extend_from_slice(&buf[..n]);
                return Ok(true);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => return Err(e),
        }
        Ok(false)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Connection(format!("SSH worker failed: {}", e)))?
}

async fn splice<S>(mut stream: S, mut near: tokio::net::UnixStream)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    match tokio::io::copy_bidirectional(&mut stream, &mut near).await {
        Ok((up, down)) => debug!("Stream bridge closed ({} bytes up, {} bytes down)", up, down),
        Err(e) => warn!("Stream bridge failed: {}", e),
    }
}

fn dial_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Dial {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => TransportError::Io(e),
        None => TransportError::Connection(format!("{} did not resolve to any address", host)),
    })
}

fn verify_host_key(session: &Session, host: &str, port: u16, policy: &HostKeyPolicy) -> Result<(), TransportError> {
    let path = match policy {
        HostKeyPolicy::Insecure => return Ok(()),
        HostKeyPolicy::KnownHosts(path) => path,
    };
    let host_key_error = |reason: &str| TransportError::HostKey {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    let (key, _) = session
        .host_key()
        .ok_or_else(|| host_key_error("server sent no host key"))?;

    let mut known = session.known_hosts()?;
    if path.exists() {
        known.read_file(path, KnownHostFileKind::OpenSSH)?;
    }
    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(host_key_error(&format!("no entry in {}", path.display()))),
        CheckResult::Mismatch => Err(host_key_error("key does not match known_hosts")),
        CheckResult::Failure => Err(host_key_error("known_hosts check failed")),
    }
}

fn authenticate(session: &Session, user: &str, identity: Option<&Path>) -> Result<(), TransportError> {
    match identity {
        Some(path) => {
            std::fs::File::open(path).map_err(|source| TransportError::Identity {
                path: path.to_path_buf(),
                source,
            })?;
            session
                .userauth_pubkey_file(user, None, path, None)
                .map_err(|e| TransportError::Authentication(e.to_string()))?;
        }
        None => session
            .userauth_agent(user)
            .map_err(|e| TransportError::Authentication(e.to_string()))?,
    }

    if !session.authenticated() {
        return Err(TransportError::Authentication(format!(
            "server rejected credentials for {}",
            user
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_trailing_newline() {
        assert_eq!(
            socket_path_from_output("/run/user/1000/podman/podman.sock\n"),
            "/run/user/1000/podman/podman.sock"
        );
        assert_eq!(socket_path_from_output("/run/podman/podman.sock"), "/run/podman/podman.sock");
        assert_eq!(socket_path_from_output("\n"), "");
    }

    /// Replays canned output and records what it was asked to run
    struct ScriptedShell {
        output: Result<String, i32>,
        commands: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedShell {
        fn new(output: Result<&str, i32>) -> Self {
            Self {
                output: output.map(str::to_string),
                commands: Default::default(),
            }
        }
    }

    #[async_trait]
    impl RemoteShell for ScriptedShell {
        async fn run(&self, command: &str) -> Result<String, TransportError> {
            self.commands.lock().unwrap().push(command.to_string());
            self.output.clone().map_err(|code| TransportError::CommandFailed {
                code,
                message: "podman: command not found".to_string(),
            })
        }
    }

    #[test]
    fn test_discover_socket_path_from_stdout() {
        let shell = ScriptedShell::new(Ok("/run/user/1000/podman/podman.sock\n"));
        let path = tokio_test::block_on(discover_socket_path(&shell, crate::REMOTE_SOCKET_COMMAND)).unwrap();
        assert_eq!(path, "/run/user/1000/podman/podman.sock");
        assert_eq!(*shell.commands.lock().unwrap(), vec![crate::REMOTE_SOCKET_COMMAND.to_string()]);
    }

    #[test]
    fn test_discover_socket_path_failures() {
        let silent = ScriptedShell::new(Ok("\n"));
        let err = tokio_test::block_on(discover_socket_path(&silent, "podman info")).unwrap_err();
        assert!(matches!(err, TransportError::CommandFailed { code: 0, .. }));

        let missing = ScriptedShell::new(Err(127));
        let err = tokio_test::block_on(discover_socket_path(&missing, "podman info")).unwrap_err();
        assert!(matches!(err, TransportError::CommandFailed { code: 127, .. }));
    }

    type Shared = std::sync::Arc<std::sync::Mutex<Vec<u8>>>;

    /// Yields one byte per read with a would-block in between; stays
    /// blocked while `blocked_by` still has bytes to give
    struct Trickle {
        data: Shared,
        blocked_by: Option<Shared>,
        stall: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.stall = !self.stall;
            let held = self.blocked_by.as_ref().is_some_and(|other| !other.lock().unwrap().is_empty());
            if self.stall || held {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let mut data = self.data.lock().unwrap();
            if data.is_empty() {
                return Ok(0);
            }
            buf[0] = data.remove(0);
            Ok(1)
        }
    }

    #[test]
    fn test_drain_both_reads_stderr_while_stdout_waits() {
        let noise: Shared = Default::default();
        noise.lock().unwrap().extend_from_slice(b"warning: cgroups v1 is deprecated\n");
        let mut stderr = Trickle {
            data: noise.clone(),
            blocked_by: None,
            stall: false,
        };
        let mut stdout = Trickle {
            data: std::sync::Arc::new(std::sync::Mutex::new(b"/run/podman/podman.sock\n".to_vec())),
            blocked_by: Some(noise),
            stall: false,
        };

        let (out, err) = drain_both(&mut stdout, &mut stderr).unwrap();
        assert_eq!(out, b"/run/podman/podman.sock\n");
        assert_eq!(err, b"warning: cgroups v1 is deprecated\n");
    }

    #[test]
    fn test_unreadable_identity() {
        let session = Session::new().unwrap();
        let err = authenticate(&session, "user", Some(Path::new("/nonexistent/id_ed25519"))).unwrap_err();
        assert!(matches!(err, TransportError::Identity { .. }));
    }

    #[test]
    fn test_insecure_policy_skips_check() {
        let session = Session::new().unwrap();
        assert!(verify_host_key(&session, "host", 22, &HostKeyPolicy::Insecure).is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let params = ConnectionParams {
            user: "user".to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            identity: None,
        };
        let result = SshSession::connect(&params, HostKeyPolicy::Insecure, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
