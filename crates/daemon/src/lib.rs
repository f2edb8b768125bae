//! # Session Bridge Daemon Library
//!
//! This crate wires logical sessions carried by a multiplexed transport
//! connection to resources on the host machine.
//!
//! ## Overview
//!
//! - **Interactive sessions**: a shell on a pseudoterminal, with window
//!   changes applied in order
//! - **One-shot commands**: run through the command interpreter, stdout and
//!   stderr kept apart, signals relayed, exit status reported
//! - **Forwarding**: TCP and Unix listeners opened on the caller's behalf,
//!   plus direct channels that connect out from this host
//! - **Agent forwarding**: a per-session socket exported as `SSH_AUTH_SOCK`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Server                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ Interactive  │  │   One-shot   │  │    File transfer     │  │
//! │  │  (pty.rs)    │  │ (command.rs) │  │  (external handler)  │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────────────┘  │
//! │         └──── agent ──────┘                                     │
//! │                                                                  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │       Request Router  ──►  Forward Registry                │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport itself is not implemented here. An adapter builds a
//! [`session::Session`] for every session channel and implements
//! [`transport::TransportHandle`] so the bridge can open channels back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daemon::config::Config;
//! use daemon::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut config = Config::load_default()?;
//! config.apply_env_overrides();
//! config.validate()?;
//! let _guard = daemon::logging::init(&config.daemon)?;
//!
//! let server = Arc::new(Server::new(&config));
//! // For every accepted session channel:
//! // server.spawn_session(session);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod forwarding;
pub mod logging;
pub mod router;
pub mod server;
pub mod session;
pub mod signals;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::Config;
pub use forwarding::{ForwardError, ForwardRegistry};
pub use router::{RequestRouter, RouterError};
pub use server::{Server, SessionKind};
pub use session::{Session, SessionError, SessionHandle, SessionIo, SessionSettings};
pub use transport::{ChannelStream, FileTransferHandler, SharedTransport, TransportHandle};
