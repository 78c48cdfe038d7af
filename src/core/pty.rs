//! Unix pseudo-terminal and shell child process.
//!
//! Opens a pty pair, forks, and execs the shell on the slave side. The parent
//! keeps a non-blocking handle on the master.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execvp, fork, setsid, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Exit code the child uses when the shell could not be executed
pub const BAD_SHELL_EXIT: i32 = 123;

const FALLBACK_SHELL: &str = "/bin/bash";

const WELCOME: &str = "Welcome to \x1b[36mvtbuf\x1b[0m\n\n";

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(#[source] nix::Error),

    #[error("Failed to fork shell process: {0}")]
    Fork(#[source] nix::Error),

    #[error("Invalid shell command: {0:?}")]
    InvalidShell(String),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How to start the child
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub shell: String,
    pub term_var: String,
    pub show_welcome: bool,
    pub cols: u16,
    pub rows: u16,
}

/// Reaped child status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// The shell could not be executed
    pub bad_shell: bool,
}

/// Shell to run: the configured one, else `$SHELL`, else bash
pub fn resolve_shell(configured: Option<&str>) -> String {
    configured
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}

fn winsize(cols: u16, rows: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Pty master plus the shell running on its slave
pub struct Pty {
    master: File,
    pid: Pid,
}

impl Pty {
    pub fn spawn(options: &SpawnOptions) -> Result<Self> {
        let ws = winsize(options.cols, options.rows);
        let OpenptyResult { master, slave } = openpty(Some(&ws), None).map_err(PtyError::Open)?;

        // Everything the child needs is allocated before forking
        let shell = CString::new(options.shell.as_bytes())
            .map_err(|_| PtyError::InvalidShell(options.shell.clone()))?;
        let argv = [shell.clone()];
        let term_key = CString::new("TERM").map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let term_val = CString::new(options.term_var.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let welcome = options.show_welcome.then_some(WELCOME.as_bytes());

        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => {
                exec_child(master, slave, &shell, &argv, &term_key, &term_val, welcome)
            }
            ForkResult::Parent { child } => {
                drop(slave);
                set_nonblocking(&master)?;
                info!("Started shell '{}' as pid {}", options.shell, child);
                Ok(Self {
                    master: File::from(master),
                    pid: child,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Independent handle on the master for the reader thread
    pub fn reader(&self) -> Result<File> {
        Ok(self.master.try_clone()?)
    }

    /// Write all of `bytes`, waiting for the master to drain when it is full
    pub fn write_all(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match (&self.master).write(bytes) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn wait_writable(&self) -> Result<()> {
        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::from(100u8)) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let ws = winsize(cols, rows);
        let fd = self.master.as_raw_fd();
        let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as libc::c_ulong, &ws) };
        if result == -1 {
            let err = io::Error::last_os_error();
            warn!("TIOCSWINSZ {}x{} failed: {}", cols, rows, err);
            return Err(PtyError::Resize(err));
        }
        debug!("pty resized to {}x{}", cols, rows);
        Ok(())
    }

    /// Reap the child if it has exited, without blocking
    pub fn try_wait(&self) -> Result<Option<ChildExit>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(ChildExit {
                code: Some(code),
                bad_shell: code == BAD_SHELL_EXIT,
            })),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!("pid {} killed by {:?}", self.pid, signal);
                Ok(Some(ChildExit {
                    code: None,
                    bad_shell: false,
                }))
            }
            Ok(_) => Ok(None),
            // Reaped elsewhere
            Err(Errno::ECHILD) => Ok(Some(ChildExit {
                code: None,
                bad_shell: false,
            })),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the child to hang up
    pub fn hangup(&self) {
        if let Err(e) = kill(self.pid, Signal::SIGHUP) {
            debug!("SIGHUP to pid {} failed: {}", self.pid, e);
        }
    }
}

impl AsFd for Pty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Runs in the forked child: make the slave the controlling terminal, set
/// up stdio and exec the shell. Never returns.
fn exec_child(
    master: OwnedFd,
    slave: OwnedFd,
    shell: &CString,
    argv: &[CString],
    term_key: &CString,
    term_val: &CString,
    welcome: Option<&[u8]>,
) -> ! {
    drop(master);

    let fd = slave.as_raw_fd();
    let ok = setsid().is_ok()
        && unsafe { libc::ioctl(fd, libc::TIOCSCTTY as libc::c_ulong, 0) } >= 0
        && dup2(fd, libc::STDIN_FILENO).is_ok()
        && dup2(fd, libc::STDOUT_FILENO).is_ok()
        && dup2(fd, libc::STDERR_FILENO).is_ok();
    if !ok {
        unsafe { libc::_exit(1) };
    }
    if fd > libc::STDERR_FILENO {
        drop(slave);
    } else {
        std::mem::forget(slave);
    }

    unsafe {
        libc::setenv(term_key.as_ptr(), term_val.as_ptr(), 1);
        if let Some(banner) = welcome {
            libc::write(libc::STDOUT_FILENO, banner.as_ptr().cast(), banner.len());
        }
    }

    let _ = execvp(shell, argv);
    unsafe { libc::_exit(BAD_SHELL_EXIT) }
}
