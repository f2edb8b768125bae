//! Forwarded listeners and their accept loops.

use std::net::SocketAddr;
use std::path::PathBuf;

use protocol::ForwardAddress;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;

use super::{bind_host, proxy_streams, tcp_port, ForwardError};
use crate::transport::SharedTransport;

/// A bound listener for one forward.
pub(crate) enum ForwardListener {
    Tcp {
        listener: TcpListener,
        /// Host as the caller asked for it.
        host: String,
        /// Port actually bound.
        port: u32,
    },
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl ForwardListener {
    /// Binds `address`. A TCP port of 0 picks a free port.
    pub(crate) async fn bind(address: &ForwardAddress) -> Result<Self, ForwardError> {
        let bind_err = |source| ForwardError::Bind {
            address: address.clone(),
            source,
        };

        match address {
            ForwardAddress::Tcp { host, port } => {
                let requested = tcp_port(*port)?;
                let listener = TcpListener::bind((bind_host(host), requested))
                    .await
                    .map_err(bind_err)?;
                let bound = listener.local_addr().map_err(bind_err)?.port();
                Ok(ForwardListener::Tcp {
                    listener,
                    host: host.clone(),
                    port: u32::from(bound),
                })
            }
            ForwardAddress::Unix { path } => {
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                Ok(ForwardListener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// The address this listener is registered under.
    pub(crate) fn address(&self) -> ForwardAddress {
        match self {
            ForwardListener::Tcp { host, port, .. } => ForwardAddress::tcp(host.clone(), *port),
            ForwardListener::Unix { path, .. } => ForwardAddress::unix(path.clone()),
        }
    }

    /// Accepts connections until `stop` fires or accepting fails, proxying
    /// each one over a channel opened back through `transport`.
    ///
    /// The listener is closed when this returns. Proxies already running
    /// are not affected.
    pub(crate) async fn serve(self, transport: SharedTransport, stop: CancellationToken) {
        let address = self.address();
        match self {
            ForwardListener::Tcp {
                listener,
                host,
                port,
            } => loop {
                let accepted = tokio::select! {
                    _ = stop.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, originator)) => {
                        stream.set_nodelay(true).ok();
                        spawn_tcp_proxy(stream, originator, host.clone(), port, transport.clone());
                    }
                    Err(e) => {
                        tracing::warn!(address = %address, "Forward listener accept error: {}", e);
                        break;
                    }
                }
            },
            ForwardListener::Unix { listener, path } => loop {
                let accepted = tokio::select! {
                    _ = stop.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, _)) => {
                        let transport = transport.clone();
                        let path = path.clone();
                        tokio::spawn(async move {
                            let channel = match transport.open_forwarded_streamlocal(&path).await {
                                Ok(channel) => channel,
                                Err(e) => {
                                    tracing::warn!(address = %path.display(), "Failed to open forwarded-streamlocal channel: {}", e);
                                    return;
                                }
                            };
                            if let Err(e) = proxy_streams(stream, channel).await {
                                tracing::debug!(address = %path.display(), "Forwarded connection ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(address = %address, "Forward listener accept error: {}", e);
                        break;
                    }
                }
            },
        }
        tracing::debug!(conn_id = %transport.connection_id(), address = %address, "Forward listener closed");
    }
}

fn spawn_tcp_proxy(
    stream: tokio::net::TcpStream,
    originator: SocketAddr,
    host: String,
    port: u32,
    transport: SharedTransport,
) {
    tokio::spawn(async move {
        let channel = match transport.open_forwarded_tcpip(&host, port, originator).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(%originator, port, "Failed to open forwarded-tcpip channel: {}", e);
                return;
            }
        };
        if let Err(e) = proxy_streams(stream, channel).await {
            tracing::debug!(%originator, port, "Forwarded connection ended: {}", e);
        }
    });
}
