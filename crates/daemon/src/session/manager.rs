//! Control operations over live sessions: open, write, resize, close.
//!
//! The manager owns the registry and turns inbound client events into
//! PTY-level actions. Operations here never block on I/O readiness; the
//! only blocking-style waits live in the reader pump, and child reaping
//! happens on detached tasks.

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{Child, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use protocol::messages::{
    OpenTerminal, ServerEvent, TerminalError, TerminalId, TerminalKind, TerminalReady,
};

use crate::config::{SessionConfig, TmuxConfig};
use crate::tmux;

use super::launcher::{self, SpawnError, DEFAULT_COLS, DEFAULT_ROWS};
use super::pump;
use super::registry::{ConnectionId, Registry, SessionRecord};

/// Outbound event channel of one client connection.
pub type EventSender = mpsc::Sender<ServerEvent>;

/// Interval at which the reaper polls a signaled child for its exit status.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Coordinates every live session of the daemon.
///
/// The registry is the only shared mutable structure; each record's OS
/// resources stay exclusively owned by that record until teardown.
pub struct SessionManager {
    registry: Arc<Registry>,
    session: SessionConfig,
    tmux: TmuxConfig,
}

impl SessionManager {
    /// Creates a manager with an empty registry.
    pub fn new(session: SessionConfig, tmux: TmuxConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            session,
            tmux,
        }
    }

    /// The registry of live sessions.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Opens a terminal for a connection, superseding any terminal that
    /// already uses the same id.
    ///
    /// Emits exactly one of `terminal_ready` or `terminal_error` on the
    /// connection's event channel. On failure no record is created and no
    /// pump is started.
    pub async fn open(&self, connection_id: &ConnectionId, events: &EventSender, req: OpenTerminal) {
        let term_id = req.term_id.clone();

        // A new open for an existing key supersedes it: descriptor closed,
        // child signaled and registry entry removed before the replacement
        // becomes visible.
        teardown(&self.registry, connection_id, &term_id).await;

        match self.spawn_session(connection_id, &req).await {
            Ok(record) => {
                self.registry.insert(Arc::clone(&record));
                pump::spawn_pump(
                    Arc::clone(&self.registry),
                    Arc::clone(&record),
                    events.clone(),
                    self.session.poll_interval_ms.clamp(1, 1000) as u16,
                );

                info!(
                    conn_id = %connection_id,
                    term_id = %term_id,
                    pid = ?record.pid,
                    kind = ?record.kind,
                    "terminal opened"
                );
                let ready = ServerEvent::TerminalReady(TerminalReady { term_id });
                let _ = events.send(ready).await;
            }
            Err(err) => {
                warn!(
                    conn_id = %connection_id,
                    term_id = %term_id,
                    error = %err,
                    "failed to open terminal"
                );
                let error = ServerEvent::TerminalError(TerminalError {
                    term_id,
                    message: err.to_string(),
                });
                let _ = events.send(error).await;
            }
        }
    }

    async fn spawn_session(
        &self,
        connection_id: &ConnectionId,
        req: &OpenTerminal,
    ) -> Result<Arc<SessionRecord>, SpawnError> {
        if let TerminalKind::TmuxAttach { session, .. } = &req.kind {
            // Attaching to a target that does not exist must fail the open
            // instead of producing a ready terminal that dies immediately.
            let exists = tmux::has_session(&self.tmux.binary, session)
                .await
                .map_err(|e| SpawnError::TmuxUnavailable(e.to_string()))?;
            if !exists {
                return Err(SpawnError::TargetNotFound(session.clone()));
            }
        }

        let rows = req.rows.unwrap_or(DEFAULT_ROWS);
        let cols = req.cols.unwrap_or(DEFAULT_COLS);
        let cwd = launcher::resolve_workdir(req.cwd.as_deref());

        let launched = launcher::launch(
            &req.kind,
            rows,
            cols,
            cwd.as_deref(),
            &self.session,
            &self.tmux,
        )?;

        Ok(SessionRecord::new(
            connection_id.clone(),
            req.term_id.clone(),
            req.kind.clone(),
            launched,
            Duration::from_millis(self.session.kill_grace_ms),
        ))
    }

    /// Writes input to a terminal.
    ///
    /// A missing record means the terminal is already closed and the input
    /// is dropped; write failures are logged and swallowed because the
    /// terminal may be mid-teardown.
    pub async fn write(&self, connection_id: &ConnectionId, terminal_id: &TerminalId, data: &str) {
        let Some(record) = self.registry.lookup(connection_id, terminal_id) else {
            trace!(
                conn_id = %connection_id,
                term_id = %terminal_id,
                "input for unknown terminal, dropping"
            );
            return;
        };

        let mut writer = record.writer.lock().await;
        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.write_all(data.as_bytes()).and_then(|()| w.flush()) {
                warn!(
                    conn_id = %connection_id,
                    term_id = %terminal_id,
                    error = %e,
                    "failed to write to PTY"
                );
            }
        }
    }

    /// Resizes a terminal, defaulting omitted dimensions to 80x24.
    ///
    /// A missing record is a no-op; resize failures are logged and
    /// swallowed.
    pub async fn resize(
        &self,
        connection_id: &ConnectionId,
        terminal_id: &TerminalId,
        rows: Option<u16>,
        cols: Option<u16>,
    ) {
        let Some(record) = self.registry.lookup(connection_id, terminal_id) else {
            trace!(
                conn_id = %connection_id,
                term_id = %terminal_id,
                "resize for unknown terminal, dropping"
            );
            return;
        };

        let size = PtySize {
            rows: rows.unwrap_or(DEFAULT_ROWS),
            cols: cols.unwrap_or(DEFAULT_COLS),
            pixel_width: 0,
            pixel_height: 0,
        };

        let master = record.master.lock().await;
        if let Some(m) = master.as_ref() {
            if let Err(e) = m.resize(size) {
                warn!(
                    conn_id = %connection_id,
                    term_id = %terminal_id,
                    error = %e,
                    "failed to resize PTY"
                );
            } else {
                debug!(
                    conn_id = %connection_id,
                    term_id = %terminal_id,
                    rows = size.rows,
                    cols = size.cols,
                    "resized PTY"
                );
            }
        }
    }

    /// Closes one terminal. A second close of the same key is a no-op.
    pub async fn close(&self, connection_id: &ConnectionId, terminal_id: &TerminalId) {
        teardown(&self.registry, connection_id, terminal_id).await;
    }

    /// Closes every terminal of a connection; used on disconnect.
    pub async fn close_all(&self, connection_id: &ConnectionId) {
        let records = self.registry.remove_all_for_connection(connection_id);
        if records.is_empty() {
            return;
        }

        info!(
            conn_id = %connection_id,
            count = records.len(),
            "closing all terminals for connection"
        );
        for record in records {
            teardown_record(&record).await;
        }
    }
}

/// Idempotent teardown of the record at (connection, terminal).
///
/// Removing the entry first means no new lookup can observe the record;
/// whoever wins the removal performs the resource release.
pub(crate) async fn teardown(
    registry: &Registry,
    connection_id: &ConnectionId,
    terminal_id: &TerminalId,
) {
    if let Some(record) = registry.remove(connection_id, terminal_id) {
        teardown_record(&record).await;
    }
}

/// Releases a record already detached from the registry.
pub(crate) async fn teardown_record(record: &Arc<SessionRecord>) {
    record.closed.store(true, Ordering::SeqCst);

    // Dropping the handles closes the canonical master and writer
    // descriptors; an already-released handle is not a failure. The pump
    // notices the removal at its next loop-top check and releases its own
    // descriptor clone when it exits.
    record.master.lock().await.take();
    record.writer.lock().await.take();

    if let Some(pid) = record.pid {
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => {
                warn!(pid, errno = %errno, "failed to signal child");
            }
        }
    }

    debug!(
        conn_id = %record.connection_id,
        term_id = %record.terminal_id,
        pid = ?record.pid,
        "session torn down"
    );

    // Reap on a detached task so teardown never blocks a request handler.
    if let Some(child) = record.child.lock().await.take() {
        spawn_reaper(
            child,
            record.kill_grace,
            record.connection_id.clone(),
            record.terminal_id.clone(),
        );
    }
}

/// Collects the signaled child's exit status, escalating to a hard kill
/// when it ignores SIGTERM past the grace period. Leaves no zombie behind.
fn spawn_reaper(
    mut child: Box<dyn Child + Send + Sync>,
    grace: Duration,
    connection_id: ConnectionId,
    terminal_id: TerminalId,
) {
    tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(
                        conn_id = %connection_id,
                        term_id = %terminal_id,
                        exit_code = status.exit_code(),
                        "child reaped"
                    );
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        conn_id = %connection_id,
                        term_id = %terminal_id,
                        error = %e,
                        "failed to poll child status"
                    );
                    return;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }

        warn!(
            conn_id = %connection_id,
            term_id = %terminal_id,
            "child ignored SIGTERM, escalating to hard kill"
        );
        if let Err(e) = child.kill() {
            debug!(error = %e, "hard kill failed, child likely already gone");
        }
        let _ = tokio::task::spawn_blocking(move || child.wait()).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages::TerminalKind;
    use tokio::time::timeout;

    fn test_manager() -> SessionManager {
        let session = SessionConfig {
            default_shell: "/bin/sh".to_string(),
            kill_grace_ms: 500,
            ..SessionConfig::default()
        };
        SessionManager::new(session, TmuxConfig::default())
    }

    #[tokio::test]
    async fn test_open_with_bad_shell_emits_error_and_no_record() {
        let session = SessionConfig {
            default_shell: "/no/such/shell".to_string(),
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(session, TmuxConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let conn = "conn-1".to_string();

        manager
            .open(
                &conn,
                &tx,
                OpenTerminal {
                    term_id: "t1".to_string(),
                    kind: TerminalKind::Shell,
                    ..OpenTerminal::default()
                },
            )
            .await;

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ServerEvent::TerminalError(_)));
        assert_eq!(manager.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn test_write_and_resize_on_unknown_key_are_noops() {
        let manager = test_manager();
        let conn = "conn-1".to_string();

        manager.write(&conn, &"ghost".to_string(), "ls\n").await;
        manager
            .resize(&conn, &"ghost".to_string(), Some(40), Some(120))
            .await;

        assert_eq!(manager.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn test_close_on_unknown_key_is_noop() {
        let manager = test_manager();
        let conn = "conn-1".to_string();

        manager.close(&conn, &"ghost".to_string()).await;
        manager.close_all(&conn).await;
        assert_eq!(manager.registry().connection_count(), 0);
    }
}
