//! Session handling.
//!
//! A [`Session`] arrives from the transport and is run by one of two
//! handlers: [`run_interactive`] for a shell on a pseudoterminal, or
//! [`run_command`] for a one-shot command on plain pipes.

pub mod channel;
pub mod command;
pub mod env;
pub mod pty;
pub mod settings;

pub use channel::{Session, SessionError, SessionHandle, SessionId, SessionIo};
pub use command::{run_command, FAILURE_EXIT_STATUS};
pub use env::{resolve_working_dir, ProcessEnv};
pub use pty::{run_interactive, PtyProcess};
pub use settings::SessionSettings;

use protocol::SessionRequest;

use crate::agent::AgentListener;
use crate::transport::SharedTransport;

/// Starts agent forwarding for a session that asked for it.
///
/// Returns `None` when it was not requested, is disabled, or the listener
/// could not be created. The session goes on without it in every case.
pub(crate) fn start_agent(
    session_id: &str,
    request: &SessionRequest,
    transport: &SharedTransport,
    settings: &SessionSettings,
) -> Option<AgentListener> {
    if !request.agent_forwarding {
        return None;
    }
    if !settings.agent_forwarding {
        tracing::debug!(session_id = %session_id, "Agent forwarding requested but disabled");
        return None;
    }

    match AgentListener::bind(&settings.agent_parent_dir(), transport.clone(), session_id) {
        Ok(listener) => Some(listener),
        Err(e) => {
            tracing::error!(session_id = %session_id, "Failed to start agent listener: {}", e);
            None
        }
    }
}
