//! Session and connection request definitions.
//!
//! The transport hands the bridge untyped names and payloads. This module
//! gives each of them a closed type: subsystem names become [`Subsystem`],
//! global request names become [`GlobalRequestKind`], forward payloads become
//! [`ForwardAddress`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Name of the file-transfer subsystem.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// Global request names for reverse forwarding.
pub const TCPIP_FORWARD: &str = "tcpip-forward";
pub const CANCEL_TCPIP_FORWARD: &str = "cancel-tcpip-forward";
pub const STREAMLOCAL_FORWARD: &str = "streamlocal-forward@openssh.com";
pub const CANCEL_STREAMLOCAL_FORWARD: &str = "cancel-streamlocal-forward@openssh.com";

// ============================================================================
// Session Requests
// ============================================================================

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

impl WindowSize {
    /// Create a new window size.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// A caller's request for a pseudoterminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyRequest {
    /// Terminal type, exported to the shell as `TERM`.
    pub term: String,
    /// Initial geometry.
    pub size: WindowSize,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            size: WindowSize::default(),
        }
    }
}

/// Everything the caller asked for when opening a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Requested subsystem name. Empty for shell/exec sessions.
    pub subsystem: String,
    /// Raw command line from an `exec` request. Empty for a plain shell.
    pub raw_command: String,
    /// Pseudoterminal request, if any.
    pub pty: Option<PtyRequest>,
    /// Environment variables set by the caller.
    pub env: Vec<(String, String)>,
    /// Whether the caller asked for authentication agent forwarding.
    pub agent_forwarding: bool,
}

/// A session's requested subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// No subsystem: a shell or a one-shot command.
    None,
    /// The file-transfer subsystem.
    Sftp,
    /// Any subsystem this server does not implement.
    Other(String),
}

impl Subsystem {
    /// Classify a subsystem name.
    pub fn parse(name: &str) -> Self {
        match name {
            "" => Subsystem::None,
            SFTP_SUBSYSTEM => Subsystem::Sftp,
            other => Subsystem::Other(other.to_string()),
        }
    }
}

// ============================================================================
// Forwarding Requests
// ============================================================================

/// The two socket flavours a listener can be forwarded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardKind {
    /// TCP `host:port`.
    Tcp,
    /// Unix-domain socket path.
    Unix,
}

/// A bind address for a forwarded listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForwardAddress {
    /// TCP bind address. An empty host means all interfaces, port 0 asks
    /// for any free port.
    Tcp {
        /// Host or IP literal.
        host: String,
        /// Port number.
        port: u32,
    },
    /// Unix socket path.
    Unix {
        /// Filesystem path of the socket.
        path: PathBuf,
    },
}

impl ForwardAddress {
    /// Create a TCP forward address.
    pub fn tcp(host: impl Into<String>, port: u32) -> Self {
        ForwardAddress::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create a Unix socket forward address.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ForwardAddress::Unix { path: path.into() }
    }

    /// The listener flavour this address needs.
    pub fn kind(&self) -> ForwardKind {
        match self {
            ForwardAddress::Tcp { .. } => ForwardKind::Tcp,
            ForwardAddress::Unix { .. } => ForwardKind::Unix,
        }
    }
}

impl fmt::Display for ForwardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardAddress::Tcp { host, port } if host.contains(':') => {
                write!(f, "[{host}]:{port}")
            }
            ForwardAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            ForwardAddress::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Connection-level requests the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRequestKind {
    /// Start listening on behalf of the caller.
    OpenForward(ForwardKind),
    /// Stop a listener started by [`GlobalRequestKind::OpenForward`].
    CancelForward(ForwardKind),
}

impl GlobalRequestKind {
    /// The wire name of this request.
    pub fn name(&self) -> &'static str {
        match self {
            GlobalRequestKind::OpenForward(ForwardKind::Tcp) => TCPIP_FORWARD,
            GlobalRequestKind::CancelForward(ForwardKind::Tcp) => CANCEL_TCPIP_FORWARD,
            GlobalRequestKind::OpenForward(ForwardKind::Unix) => STREAMLOCAL_FORWARD,
            GlobalRequestKind::CancelForward(ForwardKind::Unix) => CANCEL_STREAMLOCAL_FORWARD,
        }
    }

    /// The socket flavour this request addresses.
    pub fn forward_kind(&self) -> ForwardKind {
        match self {
            GlobalRequestKind::OpenForward(kind) | GlobalRequestKind::CancelForward(kind) => *kind,
        }
    }

    /// Every request kind, in registration order.
    pub const ALL: [GlobalRequestKind; 4] = [
        GlobalRequestKind::OpenForward(ForwardKind::Tcp),
        GlobalRequestKind::CancelForward(ForwardKind::Tcp),
        GlobalRequestKind::OpenForward(ForwardKind::Unix),
        GlobalRequestKind::CancelForward(ForwardKind::Unix),
    ];
}

impl std::str::FromStr for GlobalRequestKind {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        GlobalRequestKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ProtocolError::UnknownRequest(name.to_string()))
    }
}

/// Answer to a global request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestReply {
    /// The request succeeded. For TCP forwards, carries the port actually bound.
    Accepted {
        /// Bound port, when one was assigned.
        bound_port: Option<u32>,
    },
    /// The request was refused.
    Rejected {
        /// Human readable reason, for logs.
        reason: String,
    },
}

impl RequestReply {
    /// Whether the request was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, RequestReply::Accepted { .. })
    }
}
