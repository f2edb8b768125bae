//! One-shot command sessions.
//!
//! The command runs through the configured interpreter on plain pipes:
//! stdout and stderr go to the caller's two streams, the caller's input is
//! copied to stdin, and signal names from the caller are relayed to the
//! process. Once the process has exited and both outputs are drained, an
//! exit status is reported.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::channel::{send_exit, Session, SessionIo};
use super::env::ProcessEnv;
use super::settings::SessionSettings;
use crate::agent::AGENT_SOCKET_ENV;
use crate::signals::relay_signals;

/// Status reported for any failed command unless real codes are propagated.
pub const FAILURE_EXIT_STATUS: u32 = 127;

/// Runs a one-shot command session to completion.
///
/// Nothing is reported if the process cannot be started. If the caller's
/// channel closes first, the process is killed.
pub async fn run_command(session: Session, settings: &SessionSettings) {
    let Session {
        id,
        request,
        io,
        resizes: _,
        signals,
        exit,
        ended,
        transport,
    } = session;
    let SessionIo {
        stdin: mut caller_stdin,
        stdout: mut caller_stdout,
        stderr: mut caller_stderr,
    } = io;

    let agent = super::start_agent(&id, &request, &transport, settings);

    let mut env = ProcessEnv::inherited();
    env.extend(request.env.iter().cloned());
    if let Some(agent) = &agent {
        env.set(AGENT_SOCKET_ENV, agent.socket_path());
    }

    let mut cmd = Command::new(&settings.command_interpreter);
    if !request.raw_command.is_empty() {
        cmd.arg("-c").arg(&request.raw_command);
    }
    cmd.env_clear()
        .envs(env.iter())
        .current_dir(settings.working_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(session_id = %id, command = %request.raw_command, "Unable to start command: {}", e);
            return;
        }
    };

    tracing::info!(
        session_id = %id,
        pid = child.id(),
        command = %request.raw_command,
        "Command started"
    );

    let stop = ended.child_token();

    let stdin_task = child.stdin.take().map(|mut pipe| {
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut caller_stdin, &mut pipe).await {
                tracing::warn!(session_id = %id, "Unable to read from session: {}", e);
            }
            // Dropping the pipe closes the process's stdin.
        })
    });

    let relay_task = child.id().map(|pid| {
        let id = id.clone();
        let stop = stop.clone();
        tokio::spawn(async move { relay_signals(&id, pid, signals, stop).await })
    });

    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();

    let drain = async {
        let out = async {
            if let Some(pipe) = child_stdout.as_mut() {
                tokio::io::copy(pipe, &mut caller_stdout).await?;
            }
            caller_stdout.flush().await?;
            Ok::<_, io::Error>(())
        };
        let err = async {
            if let Some(pipe) = child_stderr.as_mut() {
                tokio::io::copy(pipe, &mut caller_stderr).await?;
            }
            caller_stderr.flush().await?;
            Ok::<_, io::Error>(())
        };
        tokio::select! {
            (out, err) = async { tokio::join!(out, err) } => {
                if let Err(e) = out.and(err) {
                    tracing::debug!(session_id = %id, "Output copy ended: {}", e);
                }
            }
            _ = stop.cancelled() => {}
        }
    };

    let wait = async {
        tokio::select! {
            status = child.wait() => status,
            _ = stop.cancelled() => {
                tracing::info!(session_id = %id, "Session closed, killing command");
                if let Err(e) = child.start_kill() {
                    tracing::debug!(session_id = %id, "Kill failed: {}", e);
                }
                child.wait().await
            }
        }
    };

    let (status, ()) = tokio::join!(wait, drain);

    stop.cancel();
    if let Some(task) = stdin_task {
        task.abort();
    }
    if let Some(task) = relay_task {
        let _ = task.await;
    }
    let _ = caller_stdout.shutdown().await;
    let _ = caller_stderr.shutdown().await;

    let code = exit_status_for(&status, settings.propagate_exit_code);
    match &status {
        Ok(s) => tracing::info!(session_id = %id, status = %s, reported = code, "Command exited"),
        Err(e) => tracing::warn!(session_id = %id, reported = code, "Waiting for command failed: {}", e),
    }

    if let Some(tx) = exit {
        send_exit(&id, tx, code);
    }

    drop(agent);
}

/// Maps the outcome of waiting on a command to the status reported to the
/// caller.
///
/// Success is 0. With `propagate` unset every failure is
/// [`FAILURE_EXIT_STATUS`]; with it set the process's own code is used and a
/// signal death becomes 128 plus the signal number.
pub fn exit_status_for(status: &io::Result<ExitStatus>, propagate: bool) -> u32 {
    match status {
        Ok(s) if s.success() => 0,
        Ok(s) if propagate => s
            .code()
            .map(|code| code as u32)
            .or_else(|| s.signal().map(|signo| 128 + signo as u32))
            .unwrap_or(FAILURE_EXIT_STATUS),
        _ => FAILURE_EXIT_STATUS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{caller_session, FakeTransport};
    use protocol::SessionRequest;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn settings_in(dir: &TempDir) -> SessionSettings {
        SessionSettings {
            workspace_dir: dir.path().to_path_buf(),
            default_workspace_dir: dir.path().to_path_buf(),
            shell: "/bin/sh".to_string(),
            command_interpreter: "sh".to_string(),
            propagate_exit_code: false,
            agent_forwarding: true,
            agent_socket_dir: Some(dir.path().to_path_buf()),
        }
    }

    fn command(raw: &str) -> SessionRequest {
        SessionRequest {
            raw_command: raw.to_string(),
            ..SessionRequest::default()
        }
    }

    #[test]
    fn test_exit_status_mapping() {
        let ok = Ok(ExitStatus::from_raw(0));
        let code_3 = Ok(ExitStatus::from_raw(3 << 8));
        let killed = Ok(ExitStatus::from_raw(9));
        let failed: io::Result<ExitStatus> = Err(io::Error::other("wait failed"));

        assert_eq!(exit_status_for(&ok, false), 0);
        assert_eq!(exit_status_for(&code_3, false), 127);
        assert_eq!(exit_status_for(&killed, false), 127);
        assert_eq!(exit_status_for(&failed, false), 127);

        assert_eq!(exit_status_for(&ok, true), 0);
        assert_eq!(exit_status_for(&code_3, true), 3);
        assert_eq!(exit_status_for(&killed, true), 137);
        assert_eq!(exit_status_for(&failed, true), 127);
    }

    #[tokio::test]
    async fn test_success_reports_zero() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, mut caller) = caller_session(command("echo out; echo err >&2"), transport);

        run_command(session, &settings_in(&dir)).await;

        assert_eq!(handle.exit.await.unwrap(), 0);
        assert_eq!(caller.stdout_to_end().await, "out\n");
        assert_eq!(caller.stderr_to_end().await, "err\n");
    }

    #[tokio::test]
    async fn test_failure_reports_127() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) = caller_session(command("exit 3"), transport);

        run_command(session, &settings_in(&dir)).await;

        assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);
    }

    #[tokio::test]
    async fn test_missing_program_reports_127() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) =
            caller_session(command("definitely-not-a-program-xyz"), transport);

        run_command(session, &settings_in(&dir)).await;

        assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);
    }

    #[tokio::test]
    async fn test_propagate_real_code() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings_in(&dir);
        settings.propagate_exit_code = true;
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) = caller_session(command("exit 3"), transport);

        run_command(session, &settings).await;

        assert_eq!(handle.exit.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_interpreter_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings_in(&dir);
        settings.command_interpreter = "/nonexistent/interpreter".to_string();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) = caller_session(command("true"), transport);

        run_command(session, &settings).await;

        assert!(handle.exit.await.is_err());
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded_and_closed() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, mut caller) = caller_session(command("cat"), transport);

        let run = tokio::spawn({
            let settings = settings_in(&dir);
            async move { run_command(session, &settings).await }
        });

        caller.stdin.write_all(b"hello through stdin").await.unwrap();
        caller.stdin.shutdown().await.unwrap();

        let out = caller.stdout_to_end().await;
        run.await.unwrap();
        assert_eq!(out, "hello through stdin");
        assert_eq!(handle.exit.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_command_reads_script_from_stdin() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, mut caller) = caller_session(SessionRequest::default(), transport);

        let run = tokio::spawn({
            let settings = settings_in(&dir);
            async move { run_command(session, &settings).await }
        });

        caller.stdin.write_all(b"echo from-script\n").await.unwrap();
        caller.stdin.shutdown().await.unwrap();

        assert_eq!(caller.stdout_to_end().await, "from-script\n");
        run.await.unwrap();
        assert_eq!(handle.exit.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let mut request = command("echo \"$GREETING\"; pwd");
        request.env.push(("GREETING".to_string(), "hi".to_string()));
        let (session, _handle, mut caller) = caller_session(request, transport);

        run_command(session, &settings_in(&dir)).await;

        let out = caller.stdout_to_end().await;
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(out, format!("hi\n{}\n", canonical.display()));
    }

    #[tokio::test]
    async fn test_signal_relay_terminates_command() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) = caller_session(command("exec sleep 30"), transport);

        let run = tokio::spawn({
            let settings = settings_in(&dir);
            async move { run_command(session, &settings).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.signals.send("bogus".to_string()).await.unwrap();
        handle.signals.send("TERM".to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("command should end after SIGTERM")
            .unwrap();
        assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);
    }

    #[tokio::test]
    async fn test_closed_session_kills_command() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let (session, handle, _caller) = caller_session(command("exec sleep 30"), transport);

        let run = tokio::spawn({
            let settings = settings_in(&dir);
            async move { run_command(session, &settings).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.close();

        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("command should be killed when the session closes")
            .unwrap();
    }

    #[tokio::test]
    async fn test_agent_socket_exported() {
        let dir = TempDir::new().unwrap();
        let (transport, _channels) = FakeTransport::new("conn-1");
        let mut request = command("echo \"$SSH_AUTH_SOCK\"");
        request.agent_forwarding = true;
        let (session, _handle, mut caller) = caller_session(request, transport);

        run_command(session, &settings_in(&dir)).await;

        let out = caller.stdout_to_end().await;
        let path = std::path::PathBuf::from(out.trim_end());
        assert!(path.ends_with("listener.sock"));
        assert!(path.starts_with(dir.path()));
        assert!(!path.exists(), "agent socket should be removed after the session");
    }
}
