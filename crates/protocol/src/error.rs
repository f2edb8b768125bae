//! Error types for the protocol crate.

use thiserror::Error;

/// Errors raised while converting protocol input into typed values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The caller named a signal this protocol does not define.
    #[error("unsupported signal: {0}")]
    UnsupportedSignal(String),

    /// The caller sent a global request with an unknown name.
    #[error("unknown request: {0}")]
    UnknownRequest(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
