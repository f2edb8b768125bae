//! Session dispatcher.
//!
//! The `Server` is what a transport adapter talks to. It classifies each
//! new session and runs the matching handler, answers forwarding requests
//! through its [`RequestRouter`], serves direct channels, and releases a
//! connection's forwards when the connection goes away.

use std::sync::Arc;

use protocol::{ForwardAddress, RequestReply, SessionRequest, Subsystem};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::forwarding::{connect_direct, ForwardError, ForwardRegistry};
use crate::router::RequestRouter;
use crate::session::{run_command, run_interactive, Session, SessionError, SessionSettings};
use crate::transport::{ChannelStream, FileTransferHandler, SharedTransport};

/// Status reported for a subsystem this server does not serve.
pub const UNSUPPORTED_SUBSYSTEM_STATUS: u32 = 1;

/// How a session will be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Shell on a pseudoterminal.
    Interactive,
    /// One-shot command, or the interpreter reading from stdin.
    Command,
    /// File-transfer subsystem.
    FileTransfer,
    /// A subsystem that is not served here.
    Unsupported(String),
}

impl SessionKind {
    /// Classifies a session request.
    ///
    /// A file-transfer request is unsupported when no handler is installed.
    pub fn classify(request: &SessionRequest, file_transfer_available: bool) -> Self {
        match Subsystem::parse(&request.subsystem) {
            Subsystem::None if request.pty.is_some() && request.raw_command.is_empty() => {
                SessionKind::Interactive
            }
            Subsystem::None => SessionKind::Command,
            Subsystem::Sftp if file_transfer_available => SessionKind::FileTransfer,
            Subsystem::Sftp => SessionKind::Unsupported(request.subsystem.clone()),
            Subsystem::Other(name) => SessionKind::Unsupported(name),
        }
    }
}

/// The session bridge.
pub struct Server {
    settings: SessionSettings,
    router: RequestRouter,
    file_transfer: Option<Arc<dyn FileTransferHandler>>,
    allow_local: bool,
}

impl Server {
    /// Creates a server with its own forwarding registry.
    pub fn new(config: &Config) -> Self {
        Self::with_registry(config, Arc::new(ForwardRegistry::new()))
    }

    /// Creates a server that shares `registry`.
    pub fn with_registry(config: &Config, registry: Arc<ForwardRegistry>) -> Self {
        tracing::info!(
            port = config.daemon.port,
            allow_remote = config.forwarding.allow_remote,
            allow_local = config.forwarding.allow_local,
            agent = config.agent.enabled,
            "Session bridge configured"
        );
        Self {
            settings: SessionSettings::from_config(config),
            router: RequestRouter::new(registry, config.forwarding.allow_remote),
            file_transfer: None,
            allow_local: config.forwarding.allow_local,
        }
    }

    /// Installs the file-transfer subsystem.
    pub fn with_file_transfer(mut self, handler: Arc<dyn FileTransferHandler>) -> Self {
        self.file_transfer = Some(handler);
        self
    }

    /// Replaces the session settings.
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ForwardRegistry> {
        self.router.registry()
    }

    /// Runs one session to completion.
    pub async fn handle_session(&self, mut session: Session) {
        let kind = SessionKind::classify(&session.request, self.file_transfer.is_some());
        tracing::debug!(session_id = %session.id, kind = ?kind, "Session accepted");

        match kind {
            SessionKind::Interactive => run_interactive(session, &self.settings).await,
            SessionKind::Command => run_command(session, &self.settings).await,
            SessionKind::FileTransfer => self.serve_file_transfer(session).await,
            SessionKind::Unsupported(name) => {
                let err = SessionError::UnsupportedSubsystem(name);
                tracing::error!(session_id = %session.id, "{}", err);
                session.exit(UNSUPPORTED_SUBSYSTEM_STATUS);
            }
        }
    }

    /// Runs a session on its own task.
    pub fn spawn_session(self: &Arc<Self>, session: Session) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.handle_session(session).await })
    }

    /// Answers a connection-level forwarding request.
    pub async fn handle_global_request(
        &self,
        name: &str,
        address: ForwardAddress,
        transport: SharedTransport,
    ) -> RequestReply {
        self.router.route(name, address, transport).await
    }

    /// Serves a `direct-tcpip` or `direct-streamlocal` channel.
    pub async fn handle_direct_channel(
        &self,
        target: ForwardAddress,
        channel: ChannelStream,
    ) -> Result<(), ForwardError> {
        if !self.allow_local {
            tracing::warn!(target = %target, "Direct channel refused, local forwarding disabled");
            return Err(ForwardError::LocalDisabled);
        }
        let result = connect_direct(&target, channel).await;
        if let Err(e) = &result {
            tracing::warn!(target = %target, "Direct channel failed: {}", e);
        }
        result
    }

    /// Releases everything a closed connection left behind.
    pub async fn connection_closed(&self, conn_id: &str) -> usize {
        self.registry().release_connection(conn_id).await
    }

    async fn serve_file_transfer(&self, session: Session) {
        let Some(handler) = self.file_transfer.clone() else {
            return;
        };
        let id = session.id.clone();
        let ended = session.ended.clone();
        let stream: ChannelStream = Box::new(tokio::io::join(session.io.stdin, session.io.stdout));

        let result = tokio::select! {
            result = handler.serve(stream) => result,
            _ = ended.cancelled() => {
                tracing::debug!(session_id = %id, "File transfer channel closed");
                Ok(())
            }
        };

        match result {
            Ok(()) => tracing::debug!(session_id = %id, "File transfer finished"),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(session_id = %id, "File transfer closed by caller");
            }
            Err(e) => tracing::error!(session_id = %id, "File transfer completed with error: {}", e),
        }
    }
}
