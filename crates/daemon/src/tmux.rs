//! Read-only tmux resolution: attach-target checks and listings.
//!
//! This module shells out to the tmux binary with `-F` format strings and
//! parses the output. None of these lookups have side effects on the tmux
//! server; managing tmux itself is out of scope.

use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use protocol::messages::{TmuxSession, TmuxWindow};

/// How long a tmux query may run before it is abandoned.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from querying the tmux binary.
#[derive(Debug, Error)]
pub enum TmuxError {
    /// The binary could not be executed.
    #[error("failed to run {binary}: {source}")]
    Exec {
        /// The binary that was invoked.
        binary: String,
        /// The underlying cause.
        source: std::io::Error,
    },

    /// The query did not finish in time.
    #[error("tmux query timed out after {}s", QUERY_TIMEOUT.as_secs())]
    Timeout,
}

/// Whether a tmux session with the given name exists.
pub async fn has_session(binary: &str, name: &str) -> Result<bool, TmuxError> {
    let output = run(binary, &["has-session", "-t", name]).await?;
    Ok(output.status.success())
}

/// Lists all tmux sessions.
///
/// A failing `tmux list-sessions` (typically: no server running) is not an
/// error; there are simply no sessions.
pub async fn list_sessions(binary: &str) -> Result<Vec<TmuxSession>, TmuxError> {
    let output = run(
        binary,
        &[
            "list-sessions",
            "-F",
            "#{session_name}:#{session_windows}:#{session_attached}",
        ],
    )
    .await?;

    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "tmux list-sessions failed, treating as empty"
        );
        return Ok(Vec::new());
    }

    Ok(parse_sessions(&String::from_utf8_lossy(&output.stdout)))
}

/// Lists the windows of a tmux session.
pub async fn list_windows(binary: &str, session: &str) -> Result<Vec<TmuxWindow>, TmuxError> {
    let output = run(
        binary,
        &[
            "list-windows",
            "-t",
            session,
            "-F",
            "#{window_index}:#{window_name}",
        ],
    )
    .await?;

    if !output.status.success() {
        debug!(
            session = %session,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "tmux list-windows failed, treating as empty"
        );
        return Ok(Vec::new());
    }

    Ok(parse_windows(&String::from_utf8_lossy(&output.stdout)))
}

async fn run(binary: &str, args: &[&str]) -> Result<Output, TmuxError> {
    let future = Command::new(binary).args(args).output();

    match tokio::time::timeout(QUERY_TIMEOUT, future).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(TmuxError::Exec {
            binary: binary.to_string(),
            source,
        }),
        Err(_) => Err(TmuxError::Timeout),
    }
}

fn parse_sessions(stdout: &str) -> Vec<TmuxSession> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let name = parts.next()?;
            if name.is_empty() {
                return None;
            }
            let windows = parts.next()?.parse().ok()?;
            let attached: u32 = parts.next()?.parse().ok()?;
            Some(TmuxSession {
                name: name.to_string(),
                windows,
                attached: attached > 0,
            })
        })
        .collect()
}

fn parse_windows(stdout: &str) -> Vec<TmuxWindow> {
    stdout
        .lines()
        .filter_map(|line| {
            let (index, name) = line.split_once(':')?;
            Some(TmuxWindow {
                index: index.parse().ok()?,
                name: name.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sessions() {
        let stdout = "main:3:1\nscratch:1:0\n";
        let sessions = parse_sessions(stdout);

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "main");
        assert_eq!(sessions[0].windows, 3);
        assert!(sessions[0].attached);
        assert_eq!(sessions[1].name, "scratch");
        assert!(!sessions[1].attached);
    }

    #[test]
    fn test_parse_sessions_skips_malformed_lines() {
        let stdout = "main:3:1\n\nbroken\nother:not-a-number:0\n";
        let sessions = parse_sessions(stdout);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "main");
    }

    #[test]
    fn test_parse_windows_keeps_colons_in_names() {
        let stdout = "0:editor\n1:build: release\n";
        let windows = parse_windows(stdout);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].index, 0);
        assert_eq!(windows[0].name, "editor");
        assert_eq!(windows[1].index, 1);
        assert_eq!(windows[1].name, "build: release");
    }

    #[test]
    fn test_parse_windows_empty_output() {
        assert!(parse_windows("").is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_exec_error() {
        let result = has_session("/no/such/tmux", "main").await;
        assert!(matches!(result, Err(TmuxError::Exec { .. })));
    }
}
