//! Reader pump: one task per live session moving bytes from the PTY
//! master to the owning connection.
//!
//! The pump is the only component that performs blocking-style waits. Each
//! iteration re-validates its record against the registry before touching
//! the descriptor; removing or superseding the record is the cancellation
//! signal. Whatever ends the loop, the pump emits a final closed
//! notification for its terminal and then runs teardown for its key.

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use protocol::messages::{ServerEvent, TerminalClosed, TerminalOutput};

use super::manager::teardown;
use super::registry::{Registry, SessionRecord};

/// Bounded size of a single PTY read.
const READ_BUFFER_SIZE: usize = 4096;

/// Outcome of one bounded poll-and-read step.
enum ReadStep {
    /// Nothing readable within the bounded wait.
    Timeout,
    /// A chunk of output.
    Data(Vec<u8>),
    /// The child closed its side of the PTY.
    Eof,
    /// The descriptor is no longer usable.
    Failed(Errno),
}

/// Starts the reader pump for a freshly registered record.
pub(crate) fn spawn_pump(
    registry: Arc<Registry>,
    record: Arc<SessionRecord>,
    events: mpsc::Sender<ServerEvent>,
    poll_interval_ms: u16,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The pump owns its clone of the master descriptor; teardown
        // closing the master cannot invalidate it mid-poll.
        let reader = record.reader.lock().await.take();
        let Some(reader) = reader else {
            finish(&registry, &record, &events).await;
            return;
        };
        let fd = reader.as_raw_fd();

        loop {
            // The registry no longer mapping this key to this record means
            // the session was closed or superseded: stop without touching
            // the descriptor again.
            if !registry.owns(&record) || record.is_closed() {
                debug!(
                    conn_id = %record.connection_id,
                    term_id = %record.terminal_id,
                    "session no longer registered, stopping pump"
                );
                break;
            }

            let step =
                tokio::task::spawn_blocking(move || poll_read(fd, poll_interval_ms)).await;

            match step {
                Ok(ReadStep::Timeout) => continue,
                Ok(ReadStep::Data(bytes)) => {
                    let data = String::from_utf8_lossy(&bytes).into_owned();
                    let output = ServerEvent::TerminalOutput(TerminalOutput {
                        term_id: record.terminal_id.clone(),
                        data,
                    });
                    if events.send(output).await.is_err() {
                        debug!(
                            conn_id = %record.connection_id,
                            term_id = %record.terminal_id,
                            "connection gone, stopping pump"
                        );
                        break;
                    }
                }
                Ok(ReadStep::Eof) => {
                    debug!(
                        conn_id = %record.connection_id,
                        term_id = %record.terminal_id,
                        "PTY EOF, child ended output"
                    );
                    break;
                }
                Ok(ReadStep::Failed(errno)) => {
                    // EIO is how a PTY master reports the child side
                    // hanging up; it ends the session normally.
                    if matches!(errno, Errno::EIO | Errno::EBADF) {
                        debug!(
                            conn_id = %record.connection_id,
                            term_id = %record.terminal_id,
                            errno = %errno,
                            "PTY descriptor closed"
                        );
                    } else {
                        warn!(
                            conn_id = %record.connection_id,
                            term_id = %record.terminal_id,
                            errno = %errno,
                            "error reading from PTY"
                        );
                    }
                    break;
                }
                Err(e) => {
                    warn!(
                        conn_id = %record.connection_id,
                        term_id = %record.terminal_id,
                        error = %e,
                        "pump read task failed"
                    );
                    break;
                }
            }
        }

        drop(reader);
        finish(&registry, &record, &events).await;
    })
}

/// Emits the final closed notification and runs teardown for the pump's
/// key.
///
/// The closed notification is the last event a pump emits for its
/// terminal; the connection may already be gone, which is fine. Teardown
/// is idempotent against a concurrent close request.
async fn finish(
    registry: &Registry,
    record: &Arc<SessionRecord>,
    events: &mpsc::Sender<ServerEvent>,
) {
    let closed = ServerEvent::TerminalClosed(TerminalClosed {
        term_id: record.terminal_id.clone(),
    });
    let _ = events.send(closed).await;

    teardown(registry, &record.connection_id, &record.terminal_id).await;
}

/// One bounded poll-and-read step against the pump's descriptor.
///
/// The caller owns the descriptor for the duration of the call.
fn poll_read(fd: RawFd, timeout_ms: u16) -> ReadStep {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(0) => return ReadStep::Timeout,
        Ok(_) => {}
        Err(Errno::EINTR) => return ReadStep::Timeout,
        Err(errno) => return ReadStep::Failed(errno),
    }

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    match nix::unistd::read(borrowed, &mut buf) {
        Ok(0) => ReadStep::Eof,
        Ok(n) => {
            buf.truncate(n);
            ReadStep::Data(buf)
        }
        Err(Errno::EAGAIN) => ReadStep::Timeout,
        Err(errno) => ReadStep::Failed(errno),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_read_times_out_on_silent_descriptor() {
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();
        let step = poll_read(read_end.as_raw_fd(), 10);
        assert!(matches!(step, ReadStep::Timeout));
    }

    #[test]
    fn test_poll_read_returns_written_data() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        nix::unistd::write(&write_end, b"hello pump").unwrap();

        let step = poll_read(read_end.as_raw_fd(), 100);
        match step {
            ReadStep::Data(bytes) => assert_eq!(bytes, b"hello pump"),
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn test_poll_read_sees_eof_after_writer_closes() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        drop(write_end);

        let step = poll_read(read_end.as_raw_fd(), 100);
        assert!(matches!(step, ReadStep::Eof));
    }
}
