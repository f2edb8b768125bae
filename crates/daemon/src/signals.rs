//! Delivery of protocol signals to host processes.
//!
//! [`protocol::Signal`] is the closed set of names a caller may send;
//! this module maps it onto the host's signal numbers and relays the
//! session's inbound signal names to a running process.

use nix::sys::signal::{self as host, kill};
use nix::unistd::Pid;
use protocol::Signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::SessionError;

/// Maps a protocol signal to the host signal. Total over [`Signal`].
pub fn to_host(signal: Signal) -> host::Signal {
    match signal {
        Signal::Abrt => host::Signal::SIGABRT,
        Signal::Alrm => host::Signal::SIGALRM,
        Signal::Fpe => host::Signal::SIGFPE,
        Signal::Hup => host::Signal::SIGHUP,
        Signal::Ill => host::Signal::SIGILL,
        Signal::Int => host::Signal::SIGINT,
        Signal::Kill => host::Signal::SIGKILL,
        Signal::Pipe => host::Signal::SIGPIPE,
        Signal::Quit => host::Signal::SIGQUIT,
        Signal::Segv => host::Signal::SIGSEGV,
        Signal::Term => host::Signal::SIGTERM,
        Signal::Usr1 => host::Signal::SIGUSR1,
        Signal::Usr2 => host::Signal::SIGUSR2,
        Signal::Winch => host::Signal::SIGWINCH,
    }
}

/// Sends `signal` to process `pid`.
pub fn deliver(pid: u32, signal: Signal) -> Result<(), SessionError> {
    let raw = i32::try_from(pid).map_err(|_| SessionError::NoProcess)?;
    kill(Pid::from_raw(raw), to_host(signal)).map_err(|source| SessionError::SignalFailed {
        signal,
        pid,
        source,
    })
}

/// Parses a caller-supplied signal name and sends it to `pid`.
pub fn deliver_named(pid: u32, name: &str) -> Result<Signal, SessionError> {
    let signal: Signal = name.parse()?;
    deliver(pid, signal)?;
    Ok(signal)
}

/// Relays signal names from `signals` to process `pid` until the channel
/// closes or `stop` fires.
///
/// A name that does not parse, or a signal the OS refuses, is logged and
/// the relay keeps going.
pub async fn relay_signals(
    session_id: &str,
    pid: u32,
    mut signals: mpsc::Receiver<String>,
    stop: CancellationToken,
) {
    loop {
        let name = tokio::select! {
            _ = stop.cancelled() => break,
            name = signals.recv() => match name {
                Some(name) => name,
                None => break,
            },
        };

        match deliver_named(pid, &name) {
            Ok(signal) => {
                tracing::debug!(session_id = %session_id, pid, %signal, "Delivered signal");
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, pid, signal = %name, "Signal not delivered: {}", e);
            }
        }
    }
}
