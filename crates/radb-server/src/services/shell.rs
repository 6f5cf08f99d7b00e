//! Shell execution service.
//!
//! Four modes share one service: raw or Shell Protocol v2 framing, crossed
//! with non-interactive (`shell:<cmd>`, `exec:<cmd>`) or interactive
//! (`shell:`, `shell,v2:`, `exec:`) execution. Non-interactive commands run
//! on pipes; interactive sessions get a PTY when one can be allocated and
//! fall back to pipes otherwise.
//!
//! Each direction of a bidirectional session runs as its own task holding
//! one half of the connection, so a stalled peer on one direction never
//! starves the other.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use radb_core::constants::{CHILD_KILL_GRACE, SHELL_CHUNK_SIZE};
use radb_core::error::{Error, Result};
use radb_core::protocol::shell::{self, PacketId};

use crate::router::{current_session, Response, Router};
use crate::session::{Session, SessionHandle};

#[cfg(unix)]
use crate::pty::Pty;
#[cfg(unix)]
use nix::sys::signal::Signal;

pub struct ShellService;

impl ShellService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        for (pattern, protocol) in [
            ("shell:<cmd>", false),
            ("exec:<cmd>", false),
            ("shell,v2:<cmd>", true),
        ] {
            let svc = Arc::clone(self);
            router.route(pattern, move |p| {
                let svc = Arc::clone(&svc);
                async move {
                    svc.run_command(p.required("cmd").to_owned(), protocol)
                        .await
                }
            });
        }

        for (pattern, protocol) in [("shell:", false), ("exec:", false), ("shell,v2:", true)] {
            let svc = Arc::clone(self);
            router.route(pattern, move |_p| {
                let svc = Arc::clone(&svc);
                async move { svc.run_interactive(protocol).await }
            });
        }
    }

    /// Non-interactive command: OKAY, stream output until both pipes hit
    /// EOF, then (v2 only) report the exit code.
    async fn run_command(&self, cmd: String, protocol: bool) -> Response {
        let session = current_session();

        let mut child = match spawn_piped(Some(&cmd), false) {
            Ok(child) => child,
            Err(e) => return Response::fail(format!("command execution failed: {e}")),
        };

        if session.send_okay().await.is_err() {
            terminate(&mut child).await;
            return Response::silent();
        }

        let outcome = tokio::select! {
            biased;
            _ = session.shutdown().cancelled() => Err(Error::Cancelled),
            result = drain_child(&session, &mut child, protocol) => result,
        };

        if let Err(e) = outcome {
            if !e.is_disconnect() {
                warn!(session = session.id(), error = %e, "Shell command failed");
            }
            terminate(&mut child).await;
        }

        Response::silent()
    }

    /// Interactive session: the handler takes over both directions of the
    /// connection until the child exits or the client goes away.
    async fn run_interactive(&self, protocol: bool) -> Response {
        let session = current_session();

        #[cfg(unix)]
        match Pty::spawn(None) {
            Ok(pty) => {
                if session.send_okay().await.is_err() {
                    return Response::detached();
                }
                if let Err(e) = interactive_pty(&session, Arc::new(pty), protocol).await {
                    if !e.is_disconnect() {
                        warn!(session = session.id(), error = %e, "Interactive shell failed");
                    }
                }
                return Response::detached();
            }
            Err(e) => {
                debug!(error = %e, "PTY unavailable, falling back to pipes");
            }
        }

        let mut child = match spawn_piped(None, true) {
            Ok(child) => child,
            Err(e) => return Response::fail(format!("command execution failed: {e}")),
        };

        if session.send_okay().await.is_err() {
            terminate(&mut child).await;
            return Response::detached();
        }

        if let Err(e) = interactive_pipes(&session, &mut child, protocol).await {
            if !e.is_disconnect() {
                warn!(session = session.id(), error = %e, "Interactive shell failed");
            }
            terminate(&mut child).await;
        }

        Response::detached()
    }
}

// =============================================================================
// Spawning
// =============================================================================

/// The shell every mode spawns, PTY and pipes alike.
pub(crate) fn default_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// The shell's command flag, paired with [`default_shell`].
pub(crate) fn shell_arg() -> &'static str {
    if cfg!(windows) {
        "/c"
    } else {
        "-c"
    }
}

/// Spawn the platform shell on pipes. `command` of `None` starts a bare
/// shell for interactive pipe sessions.
fn spawn_piped(command: Option<&str>, interactive: bool) -> Result<Child> {
    let shell = default_shell();
    let mut cmd = Command::new(&shell);
    if let Some(command) = command {
        cmd.arg(shell_arg()).arg(command);
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if interactive {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    cmd.spawn().map_err(|e| Error::Shell {
        message: format!("failed to spawn {shell}: {e}"),
    })
}

/// Map a wait status to the one-byte exit code of the EXIT packet.
/// Signal-terminated children report `128 + signum`.
fn exit_code(status: std::process::ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return code.clamp(0, 255) as u8;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal).clamp(0, 255) as u8;
        }
    }
    1
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(CHILD_KILL_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }
    let _ = child.kill().await;
}

// =============================================================================
// Output pumps (child -> client)
// =============================================================================

/// Copy raw bytes from a child stream to the client, flushing per chunk.
async fn pump_bytes(session: &Session, src: Option<impl AsyncRead + Unpin>) -> Result<()> {
    let Some(mut src) = src else { return Ok(()) };
    let mut buf = [0u8; SHELL_CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut writer = session.writer().await;
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
    }
}

/// Frame a child stream into v2 packets with the given id.
async fn pump_packets(
    session: &Session,
    src: Option<impl AsyncRead + Unpin>,
    id: PacketId,
) -> Result<()> {
    let Some(mut src) = src else { return Ok(()) };
    let mut buf = [0u8; SHELL_CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut writer = session.writer().await;
        shell::write_packet(&mut **writer, id, &buf[..n]).await?;
    }
}

/// Drain a non-interactive child and, in v2 mode, append the EXIT packet.
async fn drain_child(session: &Session, child: &mut Child, protocol: bool) -> Result<()> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    if protocol {
        tokio::try_join!(
            pump_packets(session, stdout, PacketId::Stdout),
            pump_packets(session, stderr, PacketId::Stderr),
        )?;
        let status = child.wait().await?;
        let mut writer = session.writer().await;
        shell::write_exit(&mut **writer, exit_code(status)).await?;
    } else {
        tokio::try_join!(
            pump_bytes(session, stdout),
            pump_bytes(session, stderr),
        )?;
        child.wait().await?;
    }
    Ok(())
}

// =============================================================================
// Interactive: PTY
// =============================================================================

#[cfg(unix)]
fn parse_winsize(payload: &[u8]) -> Option<(u16, u16, u16, u16)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut parts = text.split_whitespace();
    let rows = parts.next()?.parse().ok()?;
    let cols = parts.next()?.parse().ok()?;
    let xpixel = parts.next()?.parse().ok()?;
    let ypixel = parts.next()?.parse().ok()?;
    Some((rows, cols, xpixel, ypixel))
}

#[cfg(unix)]
async fn interactive_pty(session: &SessionHandle, pty: Arc<Pty>, protocol: bool) -> Result<()> {
    let input_task = tokio::spawn(pty_input_pump(
        Arc::clone(session),
        Arc::clone(&pty),
        protocol,
    ));

    let result = pty_output_pump(session, &pty, protocol).await;

    input_task.abort();
    shutdown_pty(&pty).await;
    result
}

/// Client-to-child direction. Owns the session's read half.
#[cfg(unix)]
async fn pty_input_pump(session: SessionHandle, pty: Arc<Pty>, protocol: bool) {
    let mut reader = session.reader().await;
    loop {
        if protocol {
            let packet = tokio::select! {
                biased;
                _ = session.shutdown().cancelled() => break,
                packet = shell::read_packet(&mut *reader) => packet,
            };
            match packet {
                Ok(Some((id, payload))) => match PacketId::from_u8(id) {
                    Some(PacketId::Stdin) => {
                        if pty.write(&payload).await.is_err() {
                            break;
                        }
                    }
                    // The PTY merges the stdio streams; there is no
                    // separate stdin to close.
                    Some(PacketId::CloseStdin) => {}
                    Some(PacketId::WindowSizeChange) => {
                        if let Some((rows, cols, xpixel, ypixel)) = parse_winsize(&payload) {
                            let _ = pty.resize(rows, cols, xpixel, ypixel);
                        }
                    }
                    _ => {}
                },
                Ok(None) | Err(_) => break,
            }
        } else {
            let mut buf = [0u8; SHELL_CHUNK_SIZE];
            let read = tokio::select! {
                biased;
                _ = session.shutdown().cancelled() => break,
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if pty.write(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Child-to-client direction. Owns the session's write half; sends the
/// EXIT packet last.
#[cfg(unix)]
async fn pty_output_pump(session: &Session, pty: &Pty, protocol: bool) -> Result<()> {
    let mut buf = [0u8; SHELL_CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = session.shutdown().cancelled() => return Err(Error::Cancelled),
            read = pty.read(&mut buf) => read,
        };
        match read? {
            Some(n) => {
                let mut writer = session.writer().await;
                if protocol {
                    shell::write_packet(&mut **writer, PacketId::Stdout, &buf[..n]).await?;
                } else {
                    writer.write_all(&buf[..n]).await?;
                    writer.flush().await?;
                }
            }
            None => break,
        }
    }

    let code = pty.wait_exit(CHILD_KILL_GRACE).await.unwrap_or(0);
    if protocol {
        let mut writer = session.writer().await;
        shell::write_exit(&mut **writer, code.clamp(0, 255) as u8).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_pty(pty: &Pty) {
    if pty.try_wait().ok().flatten().is_some() {
        return;
    }
    let _ = pty.signal(Signal::SIGTERM);
    if pty.wait_exit(CHILD_KILL_GRACE).await.is_none() {
        let _ = pty.signal(Signal::SIGKILL);
        let _ = pty.wait_exit(CHILD_KILL_GRACE).await;
    }
}

// =============================================================================
// Interactive: pipes fallback
// =============================================================================

async fn interactive_pipes(
    session: &SessionHandle,
    child: &mut Child,
    protocol: bool,
) -> Result<()> {
    let stdin = child.stdin.take();
    let input_task = tokio::spawn(pipe_input_pump(Arc::clone(session), stdin, protocol));

    let result = tokio::select! {
        biased;
        _ = session.shutdown().cancelled() => Err(Error::Cancelled),
        result = drain_child(session, child, protocol) => result,
    };

    input_task.abort();
    result
}

async fn pipe_input_pump(session: SessionHandle, stdin: Option<ChildStdin>, protocol: bool) {
    let Some(mut stdin) = stdin else { return };
    let mut reader = session.reader().await;
    loop {
        if protocol {
            match shell::read_packet(&mut *reader).await {
                Ok(Some((id, payload))) => match PacketId::from_u8(id) {
                    Some(PacketId::Stdin) => {
                        if stdin.write_all(&payload).await.is_err() {
                            break;
                        }
                        let _ = stdin.flush().await;
                    }
                    Some(PacketId::CloseStdin) => break,
                    _ => {}
                },
                Ok(None) | Err(_) => break,
            }
        } else {
            let mut buf = [0u8; SHELL_CHUNK_SIZE];
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            }
        }
    }
    // Dropping stdin closes the child's input pipe.
}
