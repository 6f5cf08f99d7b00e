//! PTY management for interactive shell sessions.
//!
//! Handles:
//! - Spawning a shell (login shell or `-c <cmd>`) on a PTY pair
//! - Async I/O on the master via tokio's `AsyncFd`
//! - Window-size changes and exit-code capture
//!
//! Uses the `nix` crate for Unix PTY support and `AsyncFd` for proper
//! async integration with tokio's reactor.

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execvp, fork, setsid, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use radb_core::constants::CHILD_REAP_POLL;
use radb_core::error::{Error, Result};

use crate::services::shell::{default_shell, shell_arg};

/// Default terminal geometry until the client reports a size.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// PTY handle for async I/O on the master side.
pub struct Pty {
    master: AsyncFd<std::fs::File>,
    child_pid: Pid,
    master_fd: RawFd,
    /// Exit status once the child has been reaped.
    status: Mutex<Option<i32>>,
}

impl Pty {
    /// Spawn a shell on a fresh PTY pair.
    ///
    /// With `command`, runs `<shell> -c <command>`; without, starts the
    /// user's shell as a login shell.
    pub fn spawn(command: Option<&str>) -> Result<Self> {
        let winsize = Winsize {
            ws_row: DEFAULT_ROWS,
            ws_col: DEFAULT_COLS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pty_result = openpty(&winsize, None).map_err(|e| Error::Pty {
            message: format!("failed to open pty: {e}"),
        })?;

        let master_fd = pty_result.master.as_raw_fd();
        let slave_fd = pty_result.slave.as_raw_fd();

        let shell_path = default_shell();
        let shell_cstr = CString::new(shell_path.clone()).map_err(|e| Error::Pty {
            message: format!("invalid shell path: {e}"),
        })?;

        let mut args = vec![shell_cstr.clone()];
        match command {
            Some(cmd) => {
                args.push(CString::new(shell_arg()).unwrap());
                args.push(CString::new(cmd).map_err(|e| Error::Pty {
                    message: format!("invalid command: {e}"),
                })?);
            }
            None => {
                if shell_path.ends_with("bash") || shell_path.ends_with("zsh") {
                    args.push(CString::new("-l").unwrap());
                }
            }
        }

        debug!(shell = %shell_path, command = ?command, "Spawning PTY shell");

        // SAFETY: fork() in an async runtime is immediately followed by
        // exec in the child; the child touches no runtime state.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(pty_result.slave);

                let std_file: std::fs::File = pty_result.master.into();
                set_nonblocking(master_fd)?;

                let master = AsyncFd::new(std_file).map_err(|e| Error::Pty {
                    message: format!("failed to register pty with reactor: {e}"),
                })?;

                Ok(Self {
                    master,
                    child_pid: child,
                    master_fd,
                    status: Mutex::new(None),
                })
            }
            Ok(ForkResult::Child) => {
                // New session with the slave as controlling terminal.
                if setsid().is_err() {
                    std::process::exit(127);
                }
                // TIOCSCTTY request type varies by platform.
                unsafe {
                    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
                }

                unsafe {
                    libc::dup2(slave_fd, libc::STDIN_FILENO);
                    libc::dup2(slave_fd, libc::STDOUT_FILENO);
                    libc::dup2(slave_fd, libc::STDERR_FILENO);
                    if slave_fd > libc::STDERR_FILENO {
                        libc::close(slave_fd);
                    }
                    libc::close(master_fd);
                }

                // SAFETY: forked child before exec, single-threaded.
                if std::env::var("TERM").is_err() {
                    unsafe { std::env::set_var("TERM", "xterm-256color") };
                }

                let _ = execvp(&shell_cstr, &args);
                std::process::exit(127);
            }
            Err(e) => Err(Error::Pty {
                message: format!("fork failed: {e}"),
            }),
        }
    }

    /// Resize the PTY from a WINDOW_SIZE_CHANGE payload.
    pub fn resize(&self, rows: u16, cols: u16, xpixel: u16, ypixel: u16) -> Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: xpixel,
            ws_ypixel: ypixel,
        };

        let result = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to resize pty: {err}"),
            });
        }

        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    /// Write terminal input to the child.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self.master.writable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty write readiness: {e}"),
            })?;

            match guard.try_io(|inner| inner.get_ref().write(remaining)) {
                Ok(Ok(n)) => {
                    remaining = &remaining[n..];
                }
                Ok(Err(e)) => {
                    return Err(Error::Pty {
                        message: format!("failed to write to pty: {e}"),
                    });
                }
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Read terminal output from the child.
    ///
    /// Returns `None` when the PTY is closed (child exited).
    pub async fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            let mut guard = self.master.readable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty read readiness: {e}"),
            })?;

            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => return Ok(Some(n)),
                Ok(Err(e)) => {
                    // EIO means the slave side is gone (shell exit).
                    if e.raw_os_error() == Some(libc::EIO) {
                        return Ok(None);
                    }
                    return Err(Error::Pty {
                        message: format!("failed to read from pty: {e}"),
                    });
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Check if the child has exited; reaps it if so. The exit code is
    /// cached, so repeated calls after exit keep returning it.
    pub fn try_wait(&self) -> Result<Option<i32>> {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        let mut status = self.status.lock().unwrap();
        if status.is_some() {
            return Ok(*status);
        }

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(exit_code = code, "Shell process exited");
                *status = Some(code);
                Ok(*status)
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(signal = ?signal, "Shell process killed by signal");
                *status = Some(128 + signal as i32);
                Ok(*status)
            }
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(_) => Ok(None),
            Err(nix::errno::Errno::ECHILD) => {
                *status = Some(0);
                Ok(*status)
            }
            Err(e) => Err(Error::Pty {
                message: format!("failed to check child status: {e}"),
            }),
        }
    }

    /// Poll for child exit up to `timeout`.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(code)) = self.try_wait() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(CHILD_REAP_POLL).await;
        }
    }

    /// Send a signal to the child.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.child_pid, signal).map_err(|e| Error::Pty {
            message: format!("failed to signal child: {e}"),
        })
    }

    /// Child process PID.
    pub fn pid(&self) -> Pid {
        self.child_pid
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Last resort; orderly SIGTERM/SIGKILL teardown happens in the
        // shell service's cancellation path.
        if self.try_wait().ok().flatten().is_none() {
            let _ = self.signal(Signal::SIGKILL);
            let _ = self.try_wait();
        }
    }
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fd is a valid descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::Pty {
            message: format!("fcntl F_GETFL failed: {}", std::io::Error::last_os_error()),
        });
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::Pty {
            message: format!("fcntl F_SETFL failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}
