//! Session registry: the authoritative store of live sessions.
//!
//! The registry maps a connection id to the set of terminals the
//! connection has open. It is the sole owner of [`SessionRecord`]s; reader
//! pumps and control operations hold borrowed `Arc` clones and re-validate
//! their record against the registry before acting on it.

use std::collections::HashMap;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use portable_pty::{Child, MasterPty};
use tokio::sync::Mutex;

use protocol::messages::{TerminalId, TerminalKind};

use super::launcher::LaunchedPty;

/// Opaque identifier of one client connection.
pub type ConnectionId = String;

/// State describing one live PTY-backed child process.
///
/// The record exclusively owns the PTY master, the input writer and the
/// child handle. The handle/pid pairing never changes for the life of the
/// record; replacing a terminal always means a new record. Teardown takes
/// the handles out of their slots exactly once, so a second teardown of the
/// same record finds nothing left to release.
pub struct SessionRecord {
    /// Connection that owns this terminal.
    pub connection_id: ConnectionId,
    /// Terminal id, unique within the connection.
    pub terminal_id: TerminalId,
    /// What runs behind the PTY.
    pub kind: TerminalKind,
    /// OS process id of the child; the record owns signaling for it.
    pub pid: Option<u32>,
    /// Grace period between SIGTERM and the hard kill during teardown.
    pub(crate) kill_grace: Duration,
    /// Set when teardown has begun; stops the pump from forwarding output
    /// read after the session ended.
    pub(crate) closed: AtomicBool,
    /// Clone of the master descriptor, handed to the pump when it starts.
    pub(crate) reader: Mutex<Option<OwnedFd>>,
    pub(crate) master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    pub(crate) writer: Mutex<Option<Box<dyn Write + Send>>>,
    pub(crate) child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
}

impl SessionRecord {
    /// Wraps a launched PTY into a record owned by (connection, terminal).
    pub(crate) fn new(
        connection_id: ConnectionId,
        terminal_id: TerminalId,
        kind: TerminalKind,
        launched: LaunchedPty,
        kill_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            terminal_id,
            kind,
            pid: launched.pid,
            kill_grace,
            closed: AtomicBool::new(false),
            reader: Mutex::new(Some(launched.reader_fd)),
            master: Mutex::new(Some(launched.master)),
            writer: Mutex::new(Some(launched.writer)),
            child: Mutex::new(Some(launched.child)),
        })
    }

    /// Whether teardown of this record has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("connection_id", &self.connection_id)
            .field("terminal_id", &self.terminal_id)
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Concurrent-safe store of live sessions keyed by (connection, terminal).
///
/// Mutations on one connection's terminal map are mutually exclusive;
/// lookups may race with removals, in which case `None` means "already
/// torn down".
#[derive(Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, HashMap<TerminalId, Arc<SessionRecord>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under its (connection, terminal) key.
    ///
    /// The caller must have torn down any previous holder of the key; the
    /// registry never holds two records for the same key.
    pub fn insert(&self, record: Arc<SessionRecord>) {
        self.connections
            .entry(record.connection_id.clone())
            .or_default()
            .insert(record.terminal_id.clone(), record);
    }

    /// Returns the record at (connection, terminal), if one is live.
    pub fn lookup(
        &self,
        connection_id: &ConnectionId,
        terminal_id: &TerminalId,
    ) -> Option<Arc<SessionRecord>> {
        self.connections
            .get(connection_id)
            .and_then(|terms| terms.get(terminal_id).cloned())
    }

    /// Detaches and returns the record at (connection, terminal).
    ///
    /// Returns `None` when the key holds nothing, which callers treat as
    /// "already torn down". An emptied connection map is dropped.
    pub fn remove(
        &self,
        connection_id: &ConnectionId,
        terminal_id: &TerminalId,
    ) -> Option<Arc<SessionRecord>> {
        let removed = {
            let mut terms = self.connections.get_mut(connection_id)?;
            terms.remove(terminal_id)
        };

        if removed.is_some() {
            self.connections
                .remove_if(connection_id, |_, terms| terms.is_empty());
        }

        removed
    }

    /// Atomically detaches and returns every record of a connection.
    pub fn remove_all_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Vec<Arc<SessionRecord>> {
        self.connections
            .remove(connection_id)
            .map(|(_, terms)| terms.into_values().collect())
            .unwrap_or_default()
    }

    /// Returns the terminal ids a connection currently has open.
    pub fn terminals_for_connection(&self, connection_id: &ConnectionId) -> Vec<TerminalId> {
        self.connections
            .get(connection_id)
            .map(|terms| terms.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the registry still maps a record's key to *this* record.
    ///
    /// This is the pump's cancellation signal: removal or supersession of
    /// the record makes the check fail.
    pub fn owns(&self, record: &Arc<SessionRecord>) -> bool {
        self.lookup(&record.connection_id, &record.terminal_id)
            .map(|current| Arc::ptr_eq(&current, record))
            .unwrap_or(false)
    }

    /// Number of connections with at least one live terminal.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Total number of live sessions across all connections.
    pub fn session_count(&self) -> usize {
        self.connections.iter().map(|terms| terms.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, TmuxConfig};
    use crate::session::launcher;

    fn test_record(conn: &str, term: &str) -> Arc<SessionRecord> {
        let session = SessionConfig {
            default_shell: "/bin/sh".to_string(),
            ..SessionConfig::default()
        };
        let launched = launcher::launch(
            &TerminalKind::Shell,
            24,
            80,
            None,
            &session,
            &TmuxConfig::default(),
        )
        .expect("failed to launch test shell");

        SessionRecord::new(
            conn.to_string(),
            term.to_string(),
            TerminalKind::Shell,
            launched,
            Duration::from_millis(500),
        )
    }

    async fn release(record: &Arc<SessionRecord>) {
        record.master.lock().await.take();
        record.writer.lock().await.take();
        if let Some(mut child) = record.child.lock().await.take() {
            let _ = child.kill();
            let _ = tokio::task::spawn_blocking(move || child.wait()).await;
        }
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = Registry::new();
        let record = test_record("conn-1", "t1");

        registry.insert(Arc::clone(&record));
        assert_eq!(registry.session_count(), 1);

        let found = registry.lookup(&"conn-1".to_string(), &"t1".to_string());
        assert!(found.is_some());
        assert!(Arc::ptr_eq(&found.unwrap(), &record));

        let removed = registry.remove(&"conn-1".to_string(), &"t1".to_string());
        assert!(removed.is_some());
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.connection_count(), 0);

        // Second removal of the same key is "already torn down"
        assert!(registry.remove(&"conn-1".to_string(), &"t1".to_string()).is_none());

        release(&record).await;
    }

    #[tokio::test]
    async fn test_owns_fails_after_supersession() {
        let registry = Registry::new();
        let first = test_record("conn-1", "t1");
        let second = test_record("conn-1", "t1");

        registry.insert(Arc::clone(&first));
        assert!(registry.owns(&first));

        registry.remove(&"conn-1".to_string(), &"t1".to_string());
        registry.insert(Arc::clone(&second));

        assert!(!registry.owns(&first));
        assert!(registry.owns(&second));
        assert_eq!(registry.session_count(), 1);

        release(&first).await;
        release(&second).await;
    }

    #[tokio::test]
    async fn test_remove_all_for_connection() {
        let registry = Registry::new();
        let a = test_record("conn-1", "t1");
        let b = test_record("conn-1", "t2");
        let other = test_record("conn-2", "t1");

        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        registry.insert(Arc::clone(&other));

        let mut terms = registry.terminals_for_connection(&"conn-1".to_string());
        terms.sort();
        assert_eq!(terms, vec!["t1".to_string(), "t2".to_string()]);

        let removed = registry.remove_all_for_connection(&"conn-1".to_string());
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.session_count(), 1);
        assert!(registry
            .terminals_for_connection(&"conn-1".to_string())
            .is_empty());

        // The other connection is untouched
        assert!(registry.owns(&other));

        release(&a).await;
        release(&b).await;
        release(&other).await;
    }
}
