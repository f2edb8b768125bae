//! Port and socket forwarding.
//!
//! Reverse forwards (`tcpip-forward`, `streamlocal-forward`) bind a
//! listener on this host and send every accepted connection back to the
//! caller; they live in a [`ForwardRegistry`] keyed by bind address.
//! Direct channels (`direct-tcpip`, `direct-streamlocal`) go the other way
//! and connect out from this host, see [`direct`].

pub mod direct;
mod listener;
mod proxy;
mod registry;

pub use direct::connect_direct;
pub use proxy::proxy_streams;
pub use registry::ForwardRegistry;

use std::io;

use protocol::ForwardAddress;
use thiserror::Error;

/// Errors from forwarding operations.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// A listener already exists for this address.
    #[error("already forwarding {0}")]
    AlreadyForwarding(ForwardAddress),

    /// No listener exists for this address.
    #[error("not forwarding {0}")]
    NotForwarding(ForwardAddress),

    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: ForwardAddress,
        #[source]
        source: io::Error,
    },

    /// The port does not fit in 16 bits.
    #[error("invalid port: {0}")]
    InvalidPort(u32),

    /// Local (direct) forwarding is turned off.
    #[error("local forwarding is disabled")]
    LocalDisabled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks that a protocol port number is a real TCP port.
pub(crate) fn tcp_port(port: u32) -> Result<u16, ForwardError> {
    u16::try_from(port).map_err(|_| ForwardError::InvalidPort(port))
}

/// The host a TCP listener binds for a requested host.
///
/// An empty host or `*` means every interface.
pub(crate) fn bind_host(host: &str) -> &str {
    match host {
        "" | "*" => "0.0.0.0",
        other => other,
    }
}
