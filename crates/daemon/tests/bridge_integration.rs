//! End-to-end tests for the session bridge.
//!
//! These tests drive a `Server` the way a transport adapter would:
//! - Interactive and one-shot sessions over in-memory streams
//! - Subsystem dispatch
//! - Forwarding requests and connection teardown
//! - Agent forwarding

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use daemon::config::Config;
use daemon::server::{Server, UNSUPPORTED_SUBSYSTEM_STATUS};
use daemon::session::FAILURE_EXIT_STATUS;
use daemon::testing::{caller_session, FakeTransport, OpenedChannel};
use daemon::transport::{ChannelStream, FileTransferHandler};
use daemon::ForwardError;
use protocol::messages::{CANCEL_TCPIP_FORWARD, STREAMLOCAL_FORWARD, TCPIP_FORWARD};
use protocol::{ForwardAddress, PtyRequest, RequestReply, SessionRequest, WindowSize};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

const WAIT: Duration = Duration::from_secs(5);

/// Create a test configuration rooted in a temporary directory.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.session.workspace_dir = temp_dir.path().join("workspace");
    config.session.default_workspace_dir = temp_dir.path().to_path_buf();
    config.session.shell = "/bin/sh".to_string();
    config.session.command_interpreter = "sh".to_string();
    config.agent.socket_dir = Some(temp_dir.path().to_path_buf());
    (config, temp_dir)
}

fn create_test_server() -> (Arc<Server>, TempDir) {
    let (config, temp_dir) = create_test_config();
    (Arc::new(Server::new(&config)), temp_dir)
}

fn interactive(term: &str, cols: u16, rows: u16) -> SessionRequest {
    SessionRequest {
        pty: Some(PtyRequest {
            term: term.to_string(),
            size: WindowSize::new(cols, rows),
        }),
        ..SessionRequest::default()
    }
}

fn one_shot(command: &str) -> SessionRequest {
    SessionRequest {
        raw_command: command.to_string(),
        ..SessionRequest::default()
    }
}

// =============================================================================
// Interactive Sessions
// =============================================================================

#[tokio::test]
async fn test_interactive_resize_scenario() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (session, handle, mut caller) = caller_session(interactive("xterm", 80, 24), transport);

    let task = server.spawn_session(session);

    caller
        .stdin
        .write_all(b"echo \"term=$TERM\"; stty size\n")
        .await
        .unwrap();
    let out = caller.read_stdout_until("24 80", WAIT).await;
    assert!(out.contains("term=xterm"), "output: {out}");
    assert!(out.contains("24 80"), "output: {out}");

    handle.resizes.send(WindowSize::new(100, 40)).await.unwrap();

    // Input and resizes travel separately, so poll for the new geometry.
    let mut seen = false;
    for _ in 0..20 {
        caller.stdin.write_all(b"stty size\n").await.unwrap();
        let out = caller
            .read_stdout_until("40 100", Duration::from_millis(250))
            .await;
        if out.contains("40 100") {
            seen = true;
            break;
        }
    }
    assert!(seen, "pty never reported 40 rows x 100 cols");

    handle.close();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(handle.exit.await.is_err(), "interactive sessions report no status");
}

#[tokio::test]
async fn test_resizes_applied_in_order() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (session, handle, mut caller) = caller_session(interactive("xterm", 80, 24), transport);

    let task = server.spawn_session(session);

    for (cols, rows) in [(90, 30), (120, 50), (132, 43)] {
        handle.resizes.send(WindowSize::new(cols, rows)).await.unwrap();
    }

    let mut last = String::new();
    for _ in 0..20 {
        caller.stdin.write_all(b"stty size\n").await.unwrap();
        last = caller
            .read_stdout_until("43 132", Duration::from_millis(250))
            .await;
        if last.contains("43 132") {
            break;
        }
    }
    assert!(last.contains("43 132"), "final geometry not applied: {last}");

    handle.close();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stream_close_releases_shell() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (session, handle, mut caller) = caller_session(interactive("xterm", 80, 24), transport);

    let task = server.spawn_session(session);

    // Split markers so the terminal's echo of the command line cannot match.
    caller
        .stdin
        .write_all(b"echo \"P\"\"ID $$ D\"\"ONE\"\n")
        .await
        .unwrap();
    let out = caller.read_stdout_until("DONE", WAIT).await;
    let pid: i32 = out
        .split("PID ")
        .nth(1)
        .and_then(|rest| rest.split(" DONE").next())
        .and_then(|digits| digits.trim().parse().ok())
        .expect("shell should print its pid");

    drop(caller);
    handle.close();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    drop(handle);

    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
    assert!(!alive, "shell {pid} still running after the session closed");
}

// =============================================================================
// One-shot Commands
// =============================================================================

#[tokio::test]
async fn test_command_success_and_failure_statuses() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");

    let (session, handle, mut caller) = caller_session(one_shot("echo done"), transport.clone());
    server.handle_session(session).await;
    assert_eq!(handle.exit.await.unwrap(), 0);
    assert_eq!(caller.stdout_to_end().await, "done\n");

    let (session, handle, _caller) = caller_session(one_shot("false"), transport.clone());
    server.handle_session(session).await;
    assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);

    let (session, handle, _caller) = caller_session(one_shot("exit 42"), transport);
    server.handle_session(session).await;
    assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);
}

#[tokio::test]
async fn test_command_with_pty_request_runs_on_pipes() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let mut request = interactive("xterm", 80, 24);
    request.raw_command = "test -t 1 && echo tty || echo pipe".to_string();
    let (session, handle, mut caller) = caller_session(request, transport);

    server.handle_session(session).await;

    assert_eq!(caller.stdout_to_end().await, "pipe\n");
    assert_eq!(handle.exit.await.unwrap(), 0);
}

#[tokio::test]
async fn test_propagated_exit_code() {
    let (mut config, _temp_dir) = create_test_config();
    config.session.propagate_exit_code = true;
    let server = Server::new(&config);
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (session, handle, _caller) = caller_session(one_shot("exit 42"), transport);

    server.handle_session(session).await;

    assert_eq!(handle.exit.await.unwrap(), 42);
}

#[tokio::test]
async fn test_working_dir_reevaluated_per_session() {
    let (server, temp_dir) = create_test_server();
    let workspace = temp_dir.path().join("workspace");
    let (transport, _channels) = FakeTransport::new("conn-1");

    let (session, _handle, mut caller) = caller_session(one_shot("pwd -P"), transport.clone());
    server.handle_session(session).await;
    let first = caller.stdout_to_end().await;
    assert_eq!(
        PathBuf::from(first.trim_end()),
        temp_dir.path().canonicalize().unwrap()
    );

    std::fs::create_dir(&workspace).unwrap();

    let (session, _handle, mut caller) = caller_session(one_shot("pwd -P"), transport);
    server.handle_session(session).await;
    let second = caller.stdout_to_end().await;
    assert_eq!(
        PathBuf::from(second.trim_end()),
        workspace.canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_unsupported_signal_does_not_end_command() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (session, handle, mut caller) = caller_session(
        one_shot("trap 'echo got-usr1' USR1; while :; do sleep 0.1; done"),
        transport,
    );

    let task = server.spawn_session(session);
    tokio::time::sleep(Duration::from_millis(300)).await;

    handle.signals.send("SIGBOGUS".to_string()).await.unwrap();
    handle.signals.send("USR1".to_string()).await.unwrap();
    let out = caller.read_stdout_until("got-usr1", WAIT).await;
    assert!(out.contains("got-usr1"), "output: {out}");

    handle.signals.send("KILL".to_string()).await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.exit.await.unwrap(), FAILURE_EXIT_STATUS);
}

// =============================================================================
// Subsystems
// =============================================================================

/// Echoes everything it reads until the stream ends.
struct EchoTransfer;

#[async_trait]
impl FileTransferHandler for EchoTransfer {
    async fn serve(&self, mut stream: ChannelStream) -> io::Result<()> {
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            stream.write_all(&buf[..n]).await?;
            stream.flush().await?;
        }
    }
}

#[tokio::test]
async fn test_sftp_goes_to_file_transfer_handler() {
    let (config, _temp_dir) = create_test_config();
    let server = Arc::new(Server::new(&config).with_file_transfer(Arc::new(EchoTransfer)));
    let (transport, _channels) = FakeTransport::new("conn-1");
    let request = SessionRequest {
        subsystem: "sftp".to_string(),
        ..SessionRequest::default()
    };
    let (session, handle, mut caller) = caller_session(request, transport);

    let task = server.spawn_session(session);

    caller.stdin.write_all(b"\x00\x00\x00\x05hello").await.unwrap();
    let mut buf = [0u8; 9];
    caller.stdout.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"\x00\x00\x00\x05hello");

    drop(caller.stdin);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(handle.exit.await.is_err());
}

#[tokio::test]
async fn test_unknown_subsystem_reports_failure() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let request = SessionRequest {
        subsystem: "netconf".to_string(),
        ..SessionRequest::default()
    };
    let (session, handle, mut caller) = caller_session(request, transport);

    server.handle_session(session).await;

    assert_eq!(handle.exit.await.unwrap(), UNSUPPORTED_SUBSYSTEM_STATUS);
    assert!(caller.stdout_to_end().await.is_empty());
}

#[tokio::test]
async fn test_sftp_without_handler_is_unsupported() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let request = SessionRequest {
        subsystem: "sftp".to_string(),
        ..SessionRequest::default()
    };
    let (session, handle, _caller) = caller_session(request, transport);

    server.handle_session(session).await;

    assert_eq!(handle.exit.await.unwrap(), UNSUPPORTED_SUBSYSTEM_STATUS);
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn test_forward_open_duplicate_cancel_reopen() {
    let (server, _temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");

    let port = match server
        .handle_global_request(TCPIP_FORWARD, ForwardAddress::tcp("127.0.0.1", 0), transport.clone())
        .await
    {
        RequestReply::Accepted { bound_port: Some(port) } => port,
        other => panic!("unexpected reply {other:?}"),
    };
    let address = ForwardAddress::tcp("127.0.0.1", port);

    let duplicate = server
        .handle_global_request(TCPIP_FORWARD, address.clone(), transport.clone())
        .await;
    assert!(!duplicate.is_accepted());

    let cancel = server
        .handle_global_request(CANCEL_TCPIP_FORWARD, address.clone(), transport.clone())
        .await;
    assert!(cancel.is_accepted());

    let reopen = server
        .handle_global_request(TCPIP_FORWARD, address.clone(), transport)
        .await;
    assert_eq!(reopen, RequestReply::Accepted { bound_port: None });
    assert!(server.registry().is_listening(&address).await);
}

#[tokio::test]
async fn test_forwarded_connection_reaches_caller() {
    let (server, _temp_dir) = create_test_server();
    let (transport, mut channels) = FakeTransport::new("conn-1");

    let port = match server
        .handle_global_request(TCPIP_FORWARD, ForwardAddress::tcp("127.0.0.1", 0), transport)
        .await
    {
        RequestReply::Accepted { bound_port: Some(port) } => port,
        other => panic!("unexpected reply {other:?}"),
    };

    let mut local = TcpStream::connect(("127.0.0.1", port as u16)).await.unwrap();
    let (opened, mut remote) = tokio::time::timeout(WAIT, channels.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(opened, OpenedChannel::ForwardedTcpip { port: p, .. } if p == port));

    local.write_all(b"GET /").await.unwrap();
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"GET /");
}

#[tokio::test]
async fn test_connection_close_releases_forwards() {
    let (server, temp_dir) = create_test_server();
    let (transport, _channels) = FakeTransport::new("conn-1");
    let (other, _other_channels) = FakeTransport::new("conn-2");
    let socket_path = temp_dir.path().join("fwd.sock");

    assert!(server
        .handle_global_request(
            STREAMLOCAL_FORWARD,
            ForwardAddress::unix(&socket_path),
            transport.clone()
        )
        .await
        .is_accepted());
    assert!(server
        .handle_global_request(TCPIP_FORWARD, ForwardAddress::tcp("127.0.0.1", 0), transport)
        .await
        .is_accepted());
    assert!(server
        .handle_global_request(TCPIP_FORWARD, ForwardAddress::tcp("127.0.0.1", 0), other)
        .await
        .is_accepted());

    assert_eq!(server.connection_closed("conn-1").await, 2);
    assert_eq!(server.registry().len().await, 1);
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_direct_channel_respects_config() {
    let (mut config, _temp_dir) = create_test_config();
    config.forwarding.allow_local = false;
    let server = Server::new(&config);
    let (_caller, channel) = tokio::io::duplex(1024);

    let err = server
        .handle_direct_channel(ForwardAddress::tcp("127.0.0.1", 22), Box::new(channel))
        .await
        .unwrap_err();
    assert!(matches!(err, ForwardError::LocalDisabled));
}

#[tokio::test]
async fn test_direct_channel_to_unix_socket() {
    let (server, temp_dir) = create_test_server();
    let path = temp_dir.path().join("service.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let service = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"banner").await.unwrap();
    });

    let (mut caller, channel) = tokio::io::duplex(1024);
    let direct = tokio::spawn({
        let server = Arc::clone(&server);
        let target = ForwardAddress::unix(&path);
        async move { server.handle_direct_channel(target, Box::new(channel)).await }
    });

    let mut buf = [0u8; 6];
    caller.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"banner");

    service.await.unwrap();
    drop(caller);
    tokio::time::timeout(WAIT, direct).await.unwrap().unwrap().unwrap();
}

// =============================================================================
// Agent Forwarding
// =============================================================================

#[tokio::test]
async fn test_agent_forwarding_in_interactive_session() {
    let (server, temp_dir) = create_test_server();
    let (transport, mut channels) = FakeTransport::new("conn-1");
    let mut request = interactive("xterm", 80, 24);
    request.agent_forwarding = true;
    let (session, handle, mut caller) = caller_session(request, transport);

    let task = server.spawn_session(session);

    caller
        .stdin
        .write_all(b"echo \"sock=$SSH_AUTH_SOCK\"\n")
        .await
        .unwrap();
    let out = caller.read_stdout_until("listener.sock\r", WAIT).await;
    let socket: PathBuf = out
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("sock="))
        .find(|path| path.ends_with("listener.sock"))
        .map(PathBuf::from)
        .expect("SSH_AUTH_SOCK should be exported");
    assert!(socket.starts_with(temp_dir.path()));

    let mut local = UnixStream::connect(&socket).await.unwrap();
    local.write_all(b"agent-request").await.unwrap();
    let (opened, mut remote) = tokio::time::timeout(WAIT, channels.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened, OpenedChannel::Agent);
    let mut buf = [0u8; 13];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"agent-request");

    handle.close();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(!socket.exists(), "agent socket should be removed with the session");
}

#[tokio::test]
async fn test_agent_failure_does_not_abort_session() {
    let (mut config, temp_dir) = create_test_config();
    config.agent.socket_dir = Some(temp_dir.path().join("missing-parent"));
    let server = Server::new(&config);
    let (transport, _channels) = FakeTransport::new("conn-1");
    let mut request = one_shot("echo \"sock=$SSH_AUTH_SOCK\"");
    request.agent_forwarding = true;
    let (session, handle, mut caller) = caller_session(request, transport);

    server.handle_session(session).await;

    let out = caller.stdout_to_end().await;
    assert!(out.starts_with("sock="), "output: {out}");
    assert!(!out.contains("missing-parent"), "output: {out}");
    assert_eq!(handle.exit.await.unwrap(), 0);
}
