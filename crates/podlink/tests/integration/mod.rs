//! Scripted daemon used by the integration tests
//!
//! Listens on a unix socket in a scratch directory and answers one request
//! per connection: `/_ping` with a configurable reply, anything else with a
//! 200 whose body is the percent-decoded request path.

use anyhow::Result;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Reply to the version probe
#[derive(Debug, Clone)]
pub struct PingReply {
    pub status: u16,
    pub version: Option<String>,
}

impl PingReply {
    pub fn ok(version: &str) -> Self {
        Self {
            status: 200,
            version: Some(version.to_string()),
        }
    }

    pub fn without_version() -> Self {
        Self {
            status: 200,
            version: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self { status, version: None }
    }
}

pub struct ScriptedDaemon {
    _dir: TempDir,
    path: PathBuf,
    request_lines: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ScriptedDaemon {
    pub async fn start(ping: PingReply) -> Result<Self> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("podman.sock");
        let listener = UnixListener::bind(&path)?;
        let request_lines = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let lines = Arc::clone(&request_lines);
        let count = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(answer(socket, ping.clone(), Arc::clone(&lines)));
            }
        });

        Ok(Self {
            _dir: dir,
            path,
            request_lines,
            connections,
            task,
        })
    }

    /// `unix://` URI of the daemon socket
    pub fn uri(&self) -> String {
        format!("unix://{}", self.path.display())
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(mut socket: UnixStream, ping: PingReply, lines: Arc<Mutex<Vec<String>>>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read_exact(&mut byte).await.is_err() {
            return;
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let line = head.lines().next().unwrap_or_default().to_string();
    lines.lock().unwrap().push(line.clone());

    let target = line.split(' ').nth(1).unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default();

    let reply = if path.ends_with("/_ping") {
        let version = ping
            .version
            .map(|v| format!("Libpod-API-Version: {}\r\n", v))
            .unwrap_or_default();
        format!(
            "HTTP/1.1 {} Scripted\r\n{}Content-Length: 2\r\nConnection: close\r\n\r\nOK",
            ping.status, version
        )
    } else {
        let body = percent_decode_str(path).decode_utf8_lossy().into_owned();
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    };
    let _ = socket.write_all(reply.as_bytes()).await;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
