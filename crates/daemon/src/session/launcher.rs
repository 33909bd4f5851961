//! PTY process launching.
//!
//! This module allocates a pseudo-terminal pair and spawns the target
//! program on the slave side: either the user's login shell or a
//! `tmux attach-session` client for an existing named target. The parent
//! keeps the master side, with its descriptor switched to non-blocking
//! mode for the reader pump's poll loop.

use std::io::Write;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::warn;

use protocol::messages::TerminalKind;

use crate::config::{SessionConfig, TmuxConfig};

/// Fallback terminal rows when the client does not provide a size.
pub const DEFAULT_ROWS: u16 = 24;

/// Fallback terminal columns when the client does not provide a size.
pub const DEFAULT_COLS: u16 = 80;

/// Errors produced while launching a PTY-backed process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The PTY pair could not be allocated or configured.
    #[error("failed to allocate PTY: {0}")]
    Pty(String),

    /// The child process could not be spawned on the slave side.
    #[error("failed to spawn {command}: {reason}")]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// The underlying cause.
        reason: String,
    },

    /// The master descriptor could not be switched to non-blocking mode.
    #[error("failed to configure PTY descriptor: {0}")]
    Descriptor(#[from] nix::errno::Errno),

    /// The requested tmux target does not exist.
    #[error("tmux session not found: {0}")]
    TargetNotFound(String),

    /// The tmux binary could not be queried for the target.
    #[error("tmux unavailable: {0}")]
    TmuxUnavailable(String),
}

/// A freshly launched PTY-backed process, not yet registered.
///
/// Dropping this value releases every resource it holds, so a caller that
/// fails between launch and registration leaks nothing.
pub struct LaunchedPty {
    /// The PTY master handle; owns the master descriptor.
    pub master: Box<dyn MasterPty + Send>,
    /// Writer for the child's input.
    pub writer: Box<dyn Write + Send>,
    /// The child process handle.
    pub child: Box<dyn Child + Send + Sync>,
    /// OS process id of the child, if known.
    pub pid: Option<u32>,
    /// Raw master descriptor. Valid for as long as `master` is alive.
    pub master_fd: RawFd,
    /// Clone of the master descriptor for the reader pump. The pump owns
    /// it for its whole lifetime, so teardown closing the master never
    /// yanks a descriptor out from under an in-flight poll.
    pub reader_fd: OwnedFd,
}

/// Allocates a PTY pair and spawns the program described by `kind` on it.
///
/// The child gets `TERM` from the session config and, when provided, the
/// given working directory. On any failure the partially allocated handles
/// are dropped before returning, closing their descriptors.
pub fn launch(
    kind: &TerminalKind,
    rows: u16,
    cols: u16,
    cwd: Option<&Path>,
    session: &SessionConfig,
    tmux: &TmuxConfig,
) -> Result<LaunchedPty, SpawnError> {
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    let (program, mut cmd) = match kind {
        TerminalKind::Shell => {
            let mut cmd = CommandBuilder::new(&session.default_shell);
            cmd.arg("-l");
            (session.default_shell.clone(), cmd)
        }
        TerminalKind::TmuxAttach { session: name, window } => {
            let mut cmd = CommandBuilder::new(&tmux.binary);
            cmd.args(["attach-session", "-t", &format!("{name}:{window}")]);
            (tmux.binary.clone(), cmd)
        }
    };

    cmd.env("TERM", &session.term);
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SpawnError::Spawn {
            command: program.clone(),
            reason: e.to_string(),
        })?;

    let pid = child.process_id();

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    let master_fd = pair
        .master
        .as_raw_fd()
        .ok_or_else(|| SpawnError::Pty("master descriptor unavailable".to_string()))?;

    // The descriptor was just handed out by openpty and stays owned by the
    // master handle for the life of this borrow.
    let borrowed = unsafe { BorrowedFd::borrow_raw(master_fd) };
    set_nonblocking(borrowed)?;

    // Non-blocking mode travels with the clone; both descriptors share the
    // open file description.
    let reader_fd = borrowed
        .try_clone_to_owned()
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    Ok(LaunchedPty {
        master: pair.master,
        writer,
        child,
        pid,
        master_fd,
        reader_fd,
    })
}

/// Resolves an optional caller-supplied working directory.
///
/// The path is used only if it exists and is a directory; anything else is
/// ignored with a warning. This is a read-only lookup with no side effects.
pub fn resolve_workdir(root: Option<&str>) -> Option<PathBuf> {
    let root = root?;
    let path = PathBuf::from(root);
    if path.is_dir() {
        Some(path)
    } else {
        warn!(path = %root, "requested working directory does not exist, ignoring");
        None
    }
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), nix::errno::Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}
