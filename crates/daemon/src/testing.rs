//! In-memory transport for tests.
//!
//! [`FakeTransport`] hands every channel it opens to the test through an
//! unbounded receiver, as the far end of a `tokio::io::duplex` pipe.
//! [`caller_session`] builds a [`Session`] whose streams are duplex pipes
//! too, so a test can play the remote caller.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protocol::SessionRequest;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

use crate::session::{Session, SessionHandle, SessionIo};
use crate::transport::{ChannelStream, TransportHandle};

/// Buffer size of every in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A channel the bridge opened back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenedChannel {
    /// An authentication agent channel.
    Agent,
    /// A connection accepted on a forwarded TCP listener.
    ForwardedTcpip {
        /// Listener host as requested.
        host: String,
        /// Listener port as bound.
        port: u32,
        /// Peer that connected to the listener.
        originator: SocketAddr,
    },
    /// A connection accepted on a forwarded Unix listener.
    ForwardedStreamlocal {
        /// Listener socket path.
        path: PathBuf,
    },
}

/// Receiver of channels opened through a [`FakeTransport`].
pub type OpenedChannels = mpsc::UnboundedReceiver<(OpenedChannel, DuplexStream)>;

/// Transport double that records opened channels.
pub struct FakeTransport {
    id: String,
    opened: mpsc::UnboundedSender<(OpenedChannel, DuplexStream)>,
    refuse: AtomicBool,
}

impl FakeTransport {
    /// Creates a transport for connection `id`.
    pub fn new(id: &str) -> (Arc<Self>, OpenedChannels) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = FakeTransport {
            id: id.to_string(),
            opened: tx,
            refuse: AtomicBool::new(false),
        };
        (Arc::new(transport), rx)
    }

    /// Makes every later channel open fail, as a caller that refuses them.
    pub fn refuse_channels(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    fn open(&self, channel: OpenedChannel) -> io::Result<ChannelStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "channel open refused",
            ));
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.opened
            .send((channel, theirs))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test dropped receiver"))?;
        Ok(Box::new(ours))
    }
}

#[async_trait]
impl TransportHandle for FakeTransport {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn open_agent_channel(&self) -> io::Result<ChannelStream> {
        self.open(OpenedChannel::Agent)
    }

    async fn open_forwarded_tcpip(
        &self,
        host: &str,
        port: u32,
        originator: SocketAddr,
    ) -> io::Result<ChannelStream> {
        self.open(OpenedChannel::ForwardedTcpip {
            host: host.to_string(),
            port,
            originator,
        })
    }

    async fn open_forwarded_streamlocal(&self, socket_path: &Path) -> io::Result<ChannelStream> {
        self.open(OpenedChannel::ForwardedStreamlocal {
            path: socket_path.to_path_buf(),
        })
    }
}

/// The remote caller's ends of a session's streams.
pub struct Caller {
    /// Write here to feed the process; drop to send end-of-stream.
    pub stdin: DuplexStream,
    /// Process standard output.
    pub stdout: DuplexStream,
    /// Process standard error.
    pub stderr: DuplexStream,
}

impl Caller {
    /// Reads stdout until `needle` shows up or `timeout` passes.
    ///
    /// Returns everything read so far either way.
    pub async fn read_stdout_until(&mut self, needle: &str, timeout: Duration) -> String {
        read_until(&mut self.stdout, needle, timeout).await
    }

    /// Reads stdout to end-of-stream.
    pub async fn stdout_to_end(&mut self) -> String {
        let mut out = Vec::new();
        let _ = self.stdout.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Reads stderr to end-of-stream.
    pub async fn stderr_to_end(&mut self) -> String {
        let mut out = Vec::new();
        let _ = self.stderr.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Reads `stream` until `needle` shows up, the stream ends, or `timeout`.
pub async fn read_until(stream: &mut DuplexStream, needle: &str, timeout: Duration) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if String::from_utf8_lossy(&collected).contains(needle) {
            break;
        }
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
        }
    }

    String::from_utf8_lossy(&collected).into_owned()
}

/// Builds a session whose streams are in-memory pipes.
pub fn caller_session(
    request: SessionRequest,
    transport: Arc<FakeTransport>,
) -> (Session, SessionHandle, Caller) {
    let (caller_stdin, bridge_stdin) = tokio::io::duplex(PIPE_CAPACITY);
    let (bridge_stdout, caller_stdout) = tokio::io::duplex(PIPE_CAPACITY);
    let (bridge_stderr, caller_stderr) = tokio::io::duplex(PIPE_CAPACITY);

    let io = SessionIo {
        stdin: Box::new(bridge_stdin),
        stdout: Box::new(bridge_stdout),
        stderr: Box::new(bridge_stderr),
    };
    let (session, handle) = Session::new(request, io, transport);

    let caller = Caller {
        stdin: caller_stdin,
        stdout: caller_stdout,
        stderr: caller_stderr,
    };

    (session, handle, caller)
}
