//! Interactive sessions on a pseudoterminal.
//!
//! The configured shell runs on a freshly allocated PTY. Output is read on a
//! blocking thread and forwarded to the caller; caller input is written to
//! the PTY from another blocking thread; window changes are applied in the
//! order they arrive. The session ends when the PTY closes, the caller stops
//! accepting output, or the transport closes the channel. End of caller
//! input only closes the input direction.

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use protocol::WindowSize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{Session, SessionError, SessionIo};
use super::env::ProcessEnv;
use super::settings::SessionSettings;
use crate::agent::AGENT_SOCKET_ENV;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Chunks buffered between the PTY threads and the session streams.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// A shell process attached to a pseudoterminal.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Allocates a PTY of `size` and spawns `program` on it.
    ///
    /// The child sees exactly `env`, in order, and starts in `cwd`.
    pub fn spawn(
        program: &str,
        size: WindowSize,
        env: &ProcessEnv,
        cwd: &Path,
    ) -> Result<Self, SessionError> {
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SessionError::PtyFailed(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.cwd(cwd);
        cmd.env_clear();
        for (key, value) in env.iter() {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // Only the child keeps the slave open, so reads see EOF when it exits.
        drop(pair.slave);

        let pid = child.process_id();

        Ok(Self {
            master: pair.master,
            child,
            reader,
            writer,
            pid,
        })
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Applies a new window size.
    pub fn resize(&self, size: WindowSize) -> Result<(), SessionError> {
        resize_master(self.master.as_ref(), size)
    }

    /// Current size as reported by the PTY.
    pub fn size(&self) -> Result<WindowSize, SessionError> {
        let size = self
            .master
            .get_size()
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        Ok(WindowSize::new(size.cols, size.rows))
    }

    /// Splits into the parts the session tasks own.
    #[allow(clippy::type_complexity)]
    fn into_parts(
        self,
    ) -> (
        Box<dyn MasterPty + Send>,
        Box<dyn Child + Send + Sync>,
        Box<dyn Read + Send>,
        Box<dyn Write + Send>,
    ) {
        (self.master, self.child, self.reader, self.writer)
    }
}

fn pty_size(size: WindowSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn resize_master(master: &dyn MasterPty, size: WindowSize) -> Result<(), SessionError> {
    master
        .resize(pty_size(size))
        .map_err(|e| SessionError::ResizeFailed(e.to_string()))
}

/// Runs an interactive shell session to completion.
///
/// No exit status is reported. Every resource is released before this
/// returns: the shell is killed if still alive and reaped, the PTY is
/// closed, and the agent socket is removed.
pub async fn run_interactive(session: Session, settings: &SessionSettings) {
    let Session {
        id,
        request,
        io,
        resizes,
        signals: _,
        exit: _,
        ended,
        transport,
    } = session;
    let SessionIo {
        stdin: caller_stdin,
        stdout: mut caller_stdout,
        stderr: _,
    } = io;

    let pty_request = request.pty.clone().unwrap_or_default();
    let agent = super::start_agent(&id, &request, &transport, settings);

    let mut env = ProcessEnv::inherited();
    env.extend(request.env.iter().cloned());
    env.set("TERM", &pty_request.term);
    env.set("SHELL", &settings.shell);
    if let Some(agent) = &agent {
        env.set(AGENT_SOCKET_ENV, agent.socket_path());
    }

    let cwd = settings.working_dir();
    let process = match PtyProcess::spawn(&settings.shell, pty_request.size, &env, &cwd) {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(session_id = %id, "Unable to start PTY: {}", e);
            return;
        }
    };
    let pid = process.pid();
    let (master, mut child, reader, writer) = process.into_parts();

    tracing::info!(
        session_id = %id,
        pid = pid,
        shell = %settings.shell,
        cols = pty_request.size.cols,
        rows = pty_request.size.rows,
        term = %pty_request.term,
        "Interactive session started"
    );

    let stop = ended.child_token();

    let resize_task = tokio::spawn(relay_resizes(id.clone(), master, resizes, stop.clone()));
    let input_task = tokio::spawn(pump_input(id.clone(), caller_stdin, writer));
    let mut output = spawn_output_reader(id.clone(), reader);

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                tracing::debug!(session_id = %id, "Session ended by caller");
                break;
            }
            chunk = output.recv() => match chunk {
                Some(data) => {
                    if let Err(e) = write_chunk(&mut caller_stdout, &data).await {
                        tracing::debug!(session_id = %id, "Caller stream closed: {}", e);
                        break;
                    }
                }
                None => {
                    tracing::info!(session_id = %id, "PTY EOF - process exited");
                    break;
                }
            },
        }
    }

    stop.cancel();
    let _ = caller_stdout.shutdown().await;

    if let Ok(None) = child.try_wait() {
        if let Err(e) = child.kill() {
            tracing::debug!(session_id = %id, "Kill failed: {}", e);
        }
    }
    reap(&id, child).await;

    // The relay owns the master; it is closed when the task's result drops.
    match resize_task.await {
        Ok(master) => drop(master),
        Err(e) => tracing::warn!(session_id = %id, "Resize relay failed: {}", e),
    }
    input_task.abort();
    drop(output);
    drop(agent);

    tracing::info!(session_id = %id, "Interactive session closed");
}

async fn write_chunk<W>(stream: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(data).await?;
    stream.flush().await
}

async fn reap(session_id: &str, mut child: Box<dyn Child + Send + Sync>) {
    match tokio::task::spawn_blocking(move || child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(session_id = %session_id, code = status.exit_code(), "Shell reaped");
        }
        Ok(Err(e)) => tracing::warn!(session_id = %session_id, "Waiting for shell failed: {}", e),
        Err(e) => tracing::warn!(session_id = %session_id, "Reap task panicked: {}", e),
    }
}

/// Applies resize events in arrival order until `stop` fires, then hands
/// the master back for closing.
async fn relay_resizes(
    session_id: String,
    master: Box<dyn MasterPty + Send>,
    mut resizes: mpsc::Receiver<WindowSize>,
    stop: CancellationToken,
) -> Box<dyn MasterPty + Send> {
    let mut open = true;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            size = resizes.recv(), if open => match size {
                Some(size) => match resize_master(master.as_ref(), size) {
                    Ok(()) => tracing::debug!(
                        session_id = %session_id,
                        cols = size.cols,
                        rows = size.rows,
                        "Resized PTY"
                    ),
                    Err(e) => tracing::debug!(session_id = %session_id, "Resize dropped: {}", e),
                },
                None => open = false,
            },
        }
    }
    master
}

/// Copies caller input to the PTY writer on a blocking thread.
///
/// End of caller input, or a read error, closes only the input direction:
/// the writer is dropped, which hands the shell an end-of-file, and output
/// keeps flowing until the PTY closes.
async fn pump_input(
    session_id: String,
    mut caller_stdin: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
    mut writer: Box<dyn Write + Send>,
) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_CAPACITY);

    let writer_thread = tokio::task::spawn_blocking(move || {
        while let Some(chunk) = rx.blocking_recv() {
            if writer.write_all(&chunk).and_then(|_| writer.flush()).is_err() {
                break;
            }
        }
    });

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match caller_stdin.read(&mut buffer).await {
            Ok(0) => {
                tracing::debug!(session_id = %session_id, "Caller input closed");
                break;
            }
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Unable to read from session: {}", e);
                break;
            }
        }
    }

    drop(tx);
    let _ = writer_thread.await;
}

/// Reads PTY output on a blocking thread until EOF or error.
fn spawn_output_reader(session_id: String, mut reader: Box<dyn Read + Send>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // EIO is how Linux reports a PTY whose last slave closed.
                    tracing::trace!(session_id = %session_id, "PTY read ended: {}", e);
                    break;
                }
            }
        }
    });

    rx
}
