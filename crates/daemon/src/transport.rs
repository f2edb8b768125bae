//! Seams to the transport and file-transfer collaborators.
//!
//! The bridge never speaks the wire protocol itself. A transport adapter
//! turns each accepted session channel into a [`Session`](crate::session::Session)
//! and implements [`TransportHandle`] so the bridge can open channels back to
//! the caller (agent connections, forwarded connections).

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Identifies one transport connection. Forward listeners are owned by the
/// connection that requested them.
pub type ConnectionId = String;

/// Streams that can carry a channel's bytes in both directions.
pub trait ChannelStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChannelStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A boxed duplex channel stream.
pub type ChannelStream = Box<dyn ChannelStreamIo>;

/// Operations the bridge needs from the connection a session arrived on.
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    /// The connection this handle belongs to.
    fn connection_id(&self) -> &str;

    /// Open an authentication agent channel back to the caller.
    async fn open_agent_channel(&self) -> io::Result<ChannelStream>;

    /// Open a channel for a connection accepted on a forwarded TCP listener.
    ///
    /// `host`/`port` name the listener as the caller requested it (with the
    /// port actually bound), `originator` is the peer that connected.
    async fn open_forwarded_tcpip(
        &self,
        host: &str,
        port: u32,
        originator: SocketAddr,
    ) -> io::Result<ChannelStream>;

    /// Open a channel for a connection accepted on a forwarded Unix listener.
    async fn open_forwarded_streamlocal(&self, socket_path: &Path) -> io::Result<ChannelStream>;
}

/// Shared handle to a transport connection.
pub type SharedTransport = Arc<dyn TransportHandle>;

/// The file-transfer subsystem.
///
/// It receives the session's raw byte stream and owns it until the transfer
/// protocol finishes.
#[async_trait]
pub trait FileTransferHandler: Send + Sync {
    /// Serve one file-transfer session. `UnexpectedEof` is a normal close.
    async fn serve(&self, stream: ChannelStream) -> io::Result<()>;
}
