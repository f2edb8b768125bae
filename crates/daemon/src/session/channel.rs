//! The session value handed to the bridge by the transport.
//!
//! A session bundles the caller's request, the channel's byte streams, the
//! inbound resize and signal events, an exit-status sink and a cancellation
//! token the transport fires when the channel closes. The transport keeps
//! the matching [`SessionHandle`].

use protocol::{ProtocolError, SessionRequest, Signal, WindowSize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transport::SharedTransport;

/// Unique identifier for a session.
pub type SessionId = String;

/// Channel capacity for inbound resize events.
const RESIZE_CHANNEL_CAPACITY: usize = 32;

/// Channel capacity for inbound signal names.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Errors that can occur while bridging a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to allocate the pseudoterminal.
    #[error("failed to allocate PTY: {0}")]
    PtyFailed(String),

    /// Failed to spawn the process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// The caller named a signal that cannot be translated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The process has not started or was already reaped.
    #[error("no running process to signal")]
    NoProcess,

    /// The OS refused to deliver a signal.
    #[error("failed to deliver SIG{signal} to process {pid}: {source}")]
    SignalFailed {
        /// The signal that was sent.
        signal: Signal,
        /// Target process.
        pid: u32,
        /// Error reported by the OS.
        source: nix::errno::Errno,
    },

    /// The requested subsystem is not served here.
    #[error("subsystem not supported: {0}")]
    UnsupportedSubsystem(String),
}

/// The byte streams of one session channel.
pub struct SessionIo {
    /// Caller to process.
    pub stdin: Box<dyn AsyncRead + Unpin + Send>,
    /// Process standard output to caller.
    pub stdout: Box<dyn AsyncWrite + Unpin + Send>,
    /// Process standard error to caller (extended data).
    pub stderr: Box<dyn AsyncWrite + Unpin + Send>,
}

/// One accepted session, owned by the handler processing it.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) request: SessionRequest,
    pub(crate) io: SessionIo,
    pub(crate) resizes: mpsc::Receiver<WindowSize>,
    pub(crate) signals: mpsc::Receiver<String>,
    pub(crate) exit: Option<oneshot::Sender<u32>>,
    pub(crate) ended: CancellationToken,
    pub(crate) transport: SharedTransport,
}

/// The transport's side of a session.
///
/// Resize events and signal names pushed here reach the bridge in order.
/// Dropping the handle does not end the session; call [`SessionHandle::close`]
/// (or cancel [`SessionHandle::ended`]) when the channel closes.
pub struct SessionHandle {
    /// Sender for window-change events.
    pub resizes: mpsc::Sender<WindowSize>,
    /// Sender for raw signal names, as the caller sent them.
    pub signals: mpsc::Sender<String>,
    /// Receives the exit status, if the bridge reports one.
    pub exit: oneshot::Receiver<u32>,
    /// Fired by the transport when the channel closes.
    pub ended: CancellationToken,
}

impl SessionHandle {
    /// Mark the session's channel as closed.
    pub fn close(&self) {
        self.ended.cancel();
    }
}

impl Session {
    /// Creates a new session and the handle the transport keeps for it.
    pub fn new(
        request: SessionRequest,
        io: SessionIo,
        transport: SharedTransport,
    ) -> (Self, SessionHandle) {
        let (resize_tx, resize_rx) = mpsc::channel(RESIZE_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let ended = CancellationToken::new();

        let session = Session {
            id: Uuid::new_v4().to_string(),
            request,
            io,
            resizes: resize_rx,
            signals: signal_rx,
            exit: Some(exit_tx),
            ended: ended.clone(),
            transport,
        };

        let handle = SessionHandle {
            resizes: resize_tx,
            signals: signal_tx,
            exit: exit_rx,
            ended,
        };

        (session, handle)
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns what the caller asked for.
    pub fn request(&self) -> &SessionRequest {
        &self.request
    }

    /// Reports an exit status to the caller. Only the first call has effect.
    pub fn exit(&mut self, status: u32) {
        if let Some(tx) = self.exit.take() {
            send_exit(&self.id, tx, status);
        }
    }
}

pub(crate) fn send_exit(session_id: &str, tx: oneshot::Sender<u32>, status: u32) {
    if tx.send(status).is_err() {
        tracing::debug!(session_id = %session_id, "Exit status receiver gone");
    }
}
