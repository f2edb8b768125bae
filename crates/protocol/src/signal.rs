//! Protocol-level signal names.
//!
//! Callers name signals the way RFC 4254 §6.10 does (`"TERM"`, `"INT"`, ...).
//! Names are parsed into [`Signal`] at the protocol boundary so everything
//! past it matches on a closed set instead of comparing strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A signal a caller may ask to deliver to a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    /// Abort.
    Abrt,
    /// Alarm clock.
    Alrm,
    /// Floating point exception.
    Fpe,
    /// Hangup.
    Hup,
    /// Illegal instruction.
    Ill,
    /// Interrupt.
    Int,
    /// Kill (cannot be caught).
    Kill,
    /// Broken pipe.
    Pipe,
    /// Quit.
    Quit,
    /// Segmentation fault.
    Segv,
    /// Termination request.
    Term,
    /// User-defined signal 1.
    Usr1,
    /// User-defined signal 2.
    Usr2,
    /// Window size change.
    Winch,
}

impl Signal {
    /// Every signal the protocol can carry.
    pub const ALL: [Signal; 14] = [
        Signal::Abrt,
        Signal::Alrm,
        Signal::Fpe,
        Signal::Hup,
        Signal::Ill,
        Signal::Int,
        Signal::Kill,
        Signal::Pipe,
        Signal::Quit,
        Signal::Segv,
        Signal::Term,
        Signal::Usr1,
        Signal::Usr2,
        Signal::Winch,
    ];

    /// The wire name, without the `SIG` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Abrt => "ABRT",
            Signal::Alrm => "ALRM",
            Signal::Fpe => "FPE",
            Signal::Hup => "HUP",
            Signal::Ill => "ILL",
            Signal::Int => "INT",
            Signal::Kill => "KILL",
            Signal::Pipe => "PIPE",
            Signal::Quit => "QUIT",
            Signal::Segv => "SEGV",
            Signal::Term => "TERM",
            Signal::Usr1 => "USR1",
            Signal::Usr2 => "USR2",
            Signal::Winch => "WINCH",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ProtocolError;

    /// Accepts the wire name with or without a `SIG` prefix, in any case,
    /// plus the long descriptive aliases (`"terminate"`, `"user-defined-1"`).
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);

        let signal = match bare {
            "ABRT" | "ABORT" => Signal::Abrt,
            "ALRM" | "ALARM" => Signal::Alrm,
            "FPE" | "FLOATING-POINT-EXCEPTION" => Signal::Fpe,
            "HUP" | "HANGUP" => Signal::Hup,
            "ILL" | "ILLEGAL-INSTRUCTION" => Signal::Ill,
            "INT" | "INTERRUPT" => Signal::Int,
            "KILL" => Signal::Kill,
            "PIPE" | "BROKEN-PIPE" => Signal::Pipe,
            "QUIT" => Signal::Quit,
            "SEGV" | "SEGMENTATION-FAULT" => Signal::Segv,
            "TERM" | "TERMINATE" => Signal::Term,
            "USR1" | "USER-DEFINED-1" => Signal::Usr1,
            "USR2" | "USER-DEFINED-2" => Signal::Usr2,
            "WINCH" | "WINDOW-CHANGE" => Signal::Winch,
            _ => return Err(ProtocolError::UnsupportedSignal(name.to_string())),
        };

        Ok(signal)
    }
}
