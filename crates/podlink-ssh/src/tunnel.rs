//! Per-request socket tunnels through an SSH session
//!
//! Every [`SshTunnel::open`] call opens a new `direct-streamlocal` channel on
//! the same authenticated session and splices it onto a local socket pair.
//! Nothing is multiplexed over a long-lived channel: one dial, one channel.

use ssh2::{ErrorCode, Session};
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// libssh2's EAGAIN
const LIBSSH2_ERROR_EAGAIN: i32 = -37;
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(2);
const BUFFER_SIZE: usize = 32 * 1024;

/// A channel as the pump sees it
pub type BoxedChannel = Box<dyn TunnelChannel + Send>;

/// Opens channels to a socket on the far side of a session.
///
/// Calls run on the blocking pool and may block.
pub trait ChannelOpener: Send + Sync {
    /// Open a new channel to `socket_path`
    fn open_channel(&self, socket_path: &str) -> io::Result<BoxedChannel>;
}

impl ChannelOpener for Session {
    fn open_channel(&self, socket_path: &str) -> io::Result<BoxedChannel> {
        let channel = retry_would_block(|| self.channel_direct_streamlocal(socket_path, None))?;
        Ok(Box::new(channel))
    }
}

/// Dials the remote daemon socket through an SSH session
pub struct SshTunnel {
    channels: Arc<dyn ChannelOpener>,
    socket_path: String,
    target: String,
    bridge: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("target", &self.target)
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl SshTunnel {
    pub(crate) fn new(session: Session, socket_path: String, target: String, bridge: Option<JoinHandle<()>>) -> Self {
        Self {
            channels: Arc::new(session),
            socket_path,
            target,
            bridge,
        }
    }

    /// Tunnel whose channels come from `opener`
    pub fn with_opener(
        opener: impl ChannelOpener + 'static,
        socket_path: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            channels: Arc::new(opener),
            socket_path: socket_path.into(),
            target: target.into(),
            bridge: None,
        }
    }

    /// Remote socket every channel is opened against
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Open a fresh channel to the remote socket
    pub async fn open(&self) -> io::Result<tokio::net::UnixStream> {
        let channels = Arc::clone(&self.channels);
        let path = self.socket_path.clone();
        let channel = tokio::task::spawn_blocking(move || channels.open_channel(&path))
            .await
            .map_err(io::Error::other)??;

        debug!("Opened channel to {} on {}", self.socket_path, self.target);

        let (near, far) = tokio::net::UnixStream::pair()?;
        let far = far.into_std()?;
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = pump(channel, far) {
                debug!("Channel on {} closed with error: {}", target, e);
            }
        });
        Ok(near)
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
    }
}

/// The parts of an SSH channel the pump needs.
///
/// Reads and writes are non-blocking and report `WouldBlock` when the
/// channel window is empty or full.
pub trait TunnelChannel: Read + Write {
    /// Tell the remote side no more data is coming
    fn send_eof(&mut self) -> io::Result<()>;
    /// Whether the remote side has sent EOF
    fn eof(&self) -> bool;
    /// Close the channel
    fn close(&mut self) -> io::Result<()>;
}

impl TunnelChannel for ssh2::Channel {
    fn send_eof(&mut self) -> io::Result<()> {
        retry_would_block(|| ssh2::Channel::send_eof(self)).map_err(Into::into)
    }

    fn eof(&self) -> bool {
        ssh2::Channel::eof(self)
    }

    fn close(&mut self) -> io::Result<()> {
        retry_would_block(|| ssh2::Channel::close(self)).map_err(Into::into)
    }
}

impl<C: TunnelChannel + ?Sized> TunnelChannel for Box<C> {
    fn send_eof(&mut self) -> io::Result<()> {
        (**self).send_eof()
    }

    fn eof(&self) -> bool {
        (**self).eof()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

fn retry_would_block<T>(mut op: impl FnMut() -> Result<T, ssh2::Error>) -> Result<T, ssh2::Error> {
    loop {
        match op() {
            Err(e) if matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_EAGAIN)) => thread::sleep(POLL_INTERVAL),
            other => return other,
        }
    }
}

/// Shuttle bytes both ways until either side is done.
///
/// Each direction keeps its own pending buffer, so a channel that refuses
/// writes while its window is full still gets read from. The HTTP client
/// closes its end once it no longer needs the connection, which ends the
/// channel. Remote EOF is forwarded as a write shutdown.
pub(crate) fn pump<C: TunnelChannel>(mut channel: C, mut local: StdUnixStream) -> io::Result<()> {
    local.set_nonblocking(true)?;
    let mut upstream = Pending::new();
    let mut downstream = Pending::new();
    let mut remote_done = false;

    loop {
        let mut progress = false;

        if upstream.is_empty() {
            match upstream.fill(&mut local)? {
                Some(0) => {
                    channel.send_eof()?;
                    return channel.close();
                }
                Some(_) => progress = true,
                None => {}
            }
        }
        progress |= upstream.drain(&mut channel)?;

        if downstream.is_empty() && !remote_done {
            match downstream.fill(&mut channel)? {
                Some(0) => remote_done = channel.eof(),
                Some(_) => progress = true,
                None => {}
            }
        }
        progress |= downstream.drain(&mut local)?;

        if remote_done && downstream.is_empty() {
            let _ = local.shutdown(Shutdown::Write);
            return Ok(());
        }
        if !progress {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Bytes read from one side, waiting to be written to the other
struct Pending {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl Pending {
    fn new() -> Self {
        Self {
            buf: vec![0u8; BUFFER_SIZE],
            start: 0,
            end: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Refill from `source`; `None` when it has nothing right now
    fn fill<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<Option<usize>> {
        match source.read(&mut self.buf) {
            Ok(n) => {
                self.start = 0;
                self.end = n;
                Ok(Some(n))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write as much as `sink` takes without blocking; true if any moved
    fn drain<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<bool> {
        let mut moved = false;
        while !self.is_empty() {
            match sink.write(&self.buf[self.start..self.end]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.start += n;
                    moved = true;
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(moved)
    }
}
