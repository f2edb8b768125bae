//! Caller-initiated (direct) channels.
//!
//! A `direct-tcpip` or `direct-streamlocal` channel asks this host to
//! connect to a TCP address or Unix socket; the channel's bytes are then
//! proxied to that connection.

use protocol::ForwardAddress;
use tokio::net::{TcpStream, UnixStream};

use super::{proxy_streams, tcp_port, ForwardError};
use crate::transport::ChannelStream;

/// Connects to `target` and proxies `channel` to it until both sides close.
pub async fn connect_direct(target: &ForwardAddress, channel: ChannelStream) -> Result<(), ForwardError> {
    match target {
        ForwardAddress::Tcp { host, port } => {
            let port = tcp_port(*port)?;
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true).ok();
            tracing::debug!(target = %target, "Direct TCP channel connected");
            proxy_streams(stream, channel).await?;
        }
        ForwardAddress::Unix { path } => {
            let stream = UnixStream::connect(path).await?;
            tracing::debug!(target = %target, "Direct streamlocal channel connected");
            proxy_streams(stream, channel).await?;
        }
    }
    Ok(())
}
