//! Authentication agent forwarding.
//!
//! For a session that asked for agent forwarding, an [`AgentListener`] binds
//! a Unix socket in a private temporary directory. Each local connection to
//! it is proxied over a fresh agent channel opened back to the caller. The
//! spawned process finds the socket through [`AGENT_SOCKET_ENV`].

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use crate::forwarding::proxy_streams;
use crate::transport::SharedTransport;

/// Environment variable that carries the agent socket path.
pub const AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

const AGENT_DIR_PREFIX: &str = "auth-agent";
const AGENT_SOCKET_NAME: &str = "listener.sock";

/// A per-session agent socket.
///
/// Dropping it stops accepting and removes the socket and its directory.
/// Connections already being proxied run until either side closes.
pub struct AgentListener {
    socket_path: PathBuf,
    accept_task: JoinHandle<()>,
    // Removed on drop, after the accept task is aborted.
    _dir: TempDir,
}

impl AgentListener {
    /// Binds a new agent socket under `parent`.
    pub fn bind(parent: &Path, transport: SharedTransport, session_id: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(AGENT_DIR_PREFIX)
            .tempdir_in(parent)?;
        let socket_path = dir.path().join(AGENT_SOCKET_NAME);
        let listener = UnixListener::bind(&socket_path)?;

        tracing::debug!(
            session_id = %session_id,
            socket = %socket_path.display(),
            "Agent listener bound"
        );

        let accept_task = tokio::spawn(accept_agent_connections(
            listener,
            transport,
            session_id.to_string(),
        ));

        Ok(Self {
            socket_path,
            accept_task,
            _dir: dir,
        })
    }

    /// Path of the socket, as exported to the process.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for AgentListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_agent_connections(
    listener: UnixListener,
    transport: SharedTransport,
    session_id: String,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let transport = transport.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    let channel = match transport.open_agent_channel().await {
                        Ok(channel) => channel,
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, "Failed to open agent channel: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = proxy_streams(stream, channel).await {
                        tracing::debug!(session_id = %session_id, "Agent connection ended: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Agent listener accept error: {}", e);
                break;
            }
        }
    }
}
