// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY backend abstraction and the native `forkpty` implementation.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;

use bytes::Bytes;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

/// Exit status of a terminal's child process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Terminal backend abstraction over the PTY. Object-safe for `Box<dyn Backend>`.
///
/// `run` holds `&mut self` for its whole lifetime, so there is no way to call
/// `resize` on a live backend from outside the future. Initial size is set via
/// `resize` before `run` starts; subsequent resizes are delivered through
/// `resize_rx` and applied from inside `run`'s own event loop.
pub trait Backend: Send + 'static {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<Bytes>,
        resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner.as_raw_fd(), buf).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

async fn write_all(afd: &AsyncFd<PtyFd>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::write(inner, &data[offset..]).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Native PTY backend that spawns a child process via `forkpty`.
pub struct NativePty {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
}

impl NativePty {
    /// Spawn a child process on a new PTY. `command` must have at least
    /// one element (the program to run).
    // forkpty requires unsafe: the post-fork child is partially initialized.
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String], cols: u16, rows: u16, cwd: &std::path::Path) -> anyhow::Result<Self> {
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately chdir/exec.
        let result = unsafe { forkpty(&winsize, None) }
            .map_err(|e| anyhow::anyhow!("forkpty failed: {e}"))?;
        let ForkptyResult { master, fork_result } = result;

        match fork_result {
            ForkResult::Child => {
                if std::env::set_current_dir(cwd).is_err() {
                    std::process::exit(127);
                }
                std::env::set_var("TERM", "xterm-256color");

                let c_args: Vec<CString> = match command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                {
                    Ok(args) => args,
                    Err(_) => std::process::exit(127),
                };
                if c_args.is_empty() {
                    std::process::exit(127);
                }

                let _ = execvp(&c_args[0], &c_args);
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master))
                    .map_err(|e| anyhow::anyhow!("AsyncFd::new failed: {e}"))?;
                Ok(Self { master: afd, child_pid: child })
            }
        }
    }
}

impl Backend for NativePty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        let pid = self.child_pid;
        Box::pin(async move {
            let mut buf = vec![0u8; 8192];
            let mut input_closed = false;
            let mut resize_closed = false;

            loop {
                if input_closed && resize_closed {
                    match read_chunk(&self.master, &mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            let data = Bytes::copy_from_slice(&buf[..n]);
                            if output_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    tokio::select! {
                        result = read_chunk(&self.master, &mut buf) => {
                            match result {
                                Ok(0) => break,
                                Ok(n) => {
                                    let data = Bytes::copy_from_slice(&buf[..n]);
                                    if output_tx.send(data).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                                Err(e) => return Err(e.into()),
                            }
                        }
                        input = input_rx.recv(), if !input_closed => {
                            match input {
                                Some(data) => write_all(&self.master, &data).await?,
                                None => input_closed = true,
                            }
                        }
                        size = resize_rx.recv(), if !resize_closed => {
                            match size {
                                Some((cols, rows)) => self.resize(cols, rows)?,
                                None => resize_closed = true,
                            }
                        }
                    }
                }
            }

            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid)).await??;
            Ok(status)
        })
    }

    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call.
    #[allow(unsafe_code)]
    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ is a well-defined ioctl setting the window size
        // on the PTY master fd; `ws` is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            anyhow::bail!("TIOCSWINSZ ioctl failed: {}", io::Error::last_os_error());
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        let _ = kill(self.child_pid, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus { code: Some(code), signal: None }),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) })
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}

/// Resolve the argv for a given mode/shell pair.
///
/// Unix-only: the Windows `{cmd, powershell, wsl, system}` shell table is
/// not implemented here since this PTY layer targets POSIX `forkpty`.
pub fn resolve_command(mode: &str, shell: &str) -> Vec<String> {
    match mode {
        "shell" => {
            let _ = shell; // always "system" on non-Windows
            let login_shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());
            vec![login_shell]
        }
        other => vec![other.to_owned()],
    }
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
