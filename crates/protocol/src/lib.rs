//! # Session Bridge Protocol Library
//!
//! Typed vocabulary shared between the transport adapter and the bridge
//! daemon. The transport speaks in names and loosely-typed payloads; this
//! crate turns them into closed enums before they reach session logic.
//!
//! ## Overview
//!
//! - **Signals**: [`Signal`] parses caller signal names (`"TERM"`,
//!   `"SIGINT"`, `"user-defined-1"`) and rejects everything else
//! - **Session requests**: [`SessionRequest`], [`PtyRequest`],
//!   [`WindowSize`] and the [`Subsystem`] classification
//! - **Forwarding**: [`ForwardAddress`], [`ForwardKind`],
//!   [`GlobalRequestKind`] and the [`RequestReply`] sent back to the caller
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ForwardKind, GlobalRequestKind, Signal, Subsystem};
//!
//! let signal: Signal = "SIGTERM".parse().unwrap();
//! assert_eq!(signal, Signal::Term);
//!
//! let request: GlobalRequestKind = "tcpip-forward".parse().unwrap();
//! assert_eq!(request, GlobalRequestKind::OpenForward(ForwardKind::Tcp));
//!
//! assert_eq!(Subsystem::parse("sftp"), Subsystem::Sftp);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Session and forwarding request definitions
//! - [`signal`]: Signal names
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod signal;

pub use error::{ProtocolError, Result};
pub use messages::{
    ForwardAddress, ForwardKind, GlobalRequestKind, PtyRequest, RequestReply, SessionRequest,
    Subsystem, WindowSize,
};
pub use signal::Signal;
