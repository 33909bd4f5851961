//! Event definitions for the webmux terminal bridge.
//!
//! Clients drive the daemon with [`ClientEvent`]s and receive
//! [`ServerEvent`]s in return. Every event is tagged with a terminal id so
//! that many terminals can share one connection.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier of one terminal within a connection, chosen by the client.
pub type TerminalId = String;

/// Terminal id used when a client omits one.
pub const DEFAULT_TERMINAL_ID: &str = "default";

fn default_terminal_id() -> TerminalId {
    DEFAULT_TERMINAL_ID.to_string()
}

/// What to run behind the PTY.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalKind {
    /// The user's login shell.
    #[default]
    Shell,
    /// A `tmux attach-session` client for an existing named target.
    TmuxAttach {
        /// Name of the tmux session to attach to.
        session: String,
        /// Window index within the session.
        #[serde(default)]
        window: u32,
    },
}

/// Events sent by a client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request to open a terminal, superseding any terminal with the same id.
    OpenTerminal(OpenTerminal),
    /// Keystrokes for a terminal.
    TerminalInput(TerminalInput),
    /// Terminal size change.
    TerminalResize(TerminalResize),
    /// Request to close a terminal.
    CloseTerminal(CloseTerminal),
}

impl ClientEvent {
    /// Decode a client event from a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Request to open a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTerminal {
    /// Terminal id, unique within the connection.
    #[serde(default = "default_terminal_id")]
    pub term_id: TerminalId,
    /// What to run behind the PTY.
    #[serde(default)]
    pub kind: TerminalKind,
    /// Optional working directory for the child process.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Initial terminal rows (default 24).
    #[serde(default)]
    pub rows: Option<u16>,
    /// Initial terminal columns (default 80).
    #[serde(default)]
    pub cols: Option<u16>,
}

impl Default for OpenTerminal {
    fn default() -> Self {
        Self {
            term_id: default_terminal_id(),
            kind: TerminalKind::Shell,
            cwd: None,
            rows: None,
            cols: None,
        }
    }
}

/// Keystrokes for a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInput {
    /// Terminal the input is destined for.
    #[serde(default = "default_terminal_id")]
    pub term_id: TerminalId,
    /// UTF-8 input data.
    pub data: String,
}

/// Terminal size change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResize {
    /// Terminal to resize.
    #[serde(default = "default_terminal_id")]
    pub term_id: TerminalId,
    /// New row count (default 24).
    #[serde(default)]
    pub rows: Option<u16>,
    /// New column count (default 80).
    #[serde(default)]
    pub cols: Option<u16>,
}

/// Request to close a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTerminal {
    /// Terminal to close.
    #[serde(default = "default_terminal_id")]
    pub term_id: TerminalId,
}

/// Notifications sent by the daemon to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The terminal is open and its process is running.
    TerminalReady(TerminalReady),
    /// Output read from the terminal.
    TerminalOutput(TerminalOutput),
    /// The terminal could not be opened.
    TerminalError(TerminalError),
    /// The terminal has ended; always the last event for its terminal id.
    TerminalClosed(TerminalClosed),
}

impl ServerEvent {
    /// Decode a server event from a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The terminal id this event is tagged with.
    pub fn term_id(&self) -> &TerminalId {
        match self {
            ServerEvent::TerminalReady(e) => &e.term_id,
            ServerEvent::TerminalOutput(e) => &e.term_id,
            ServerEvent::TerminalError(e) => &e.term_id,
            ServerEvent::TerminalClosed(e) => &e.term_id,
        }
    }
}

/// The terminal is open and its process is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalReady {
    /// Terminal that became ready.
    pub term_id: TerminalId,
}

/// Output read from the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    /// Terminal the output came from.
    pub term_id: TerminalId,
    /// Output text, decoded with lossy UTF-8 substitution.
    pub data: String,
}

/// The terminal could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalError {
    /// Terminal the open request named.
    pub term_id: TerminalId,
    /// Human-readable cause.
    pub message: String,
}

/// The terminal has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalClosed {
    /// Terminal that ended.
    pub term_id: TerminalId,
}

// ============================================================================
// Listings
// ============================================================================

/// One tmux session, as reported by `tmux list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session name.
    pub name: String,
    /// Number of windows in the session.
    pub windows: u32,
    /// Whether any client is currently attached.
    pub attached: bool,
}

/// One window of a tmux session, as reported by `tmux list-windows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxWindow {
    /// Window index within its session.
    pub index: u32,
    /// Window name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_terminal_defaults() {
        let event =
            ClientEvent::from_json(r#"{"event":"open_terminal","data":{}}"#).unwrap();

        match event {
            ClientEvent::OpenTerminal(open) => {
                assert_eq!(open.term_id, DEFAULT_TERMINAL_ID);
                assert_eq!(open.kind, TerminalKind::Shell);
                assert_eq!(open.cwd, None);
                assert_eq!(open.rows, None);
                assert_eq!(open.cols, None);
            }
            other => panic!("expected OpenTerminal, got {:?}", other),
        }
    }

    #[test]
    fn test_open_terminal_tmux_attach() {
        let json = r#"{
            "event": "open_terminal",
            "data": {
                "term_id": "t1",
                "kind": {"type": "tmux_attach", "session": "work", "window": 2},
                "cwd": "/tmp"
            }
        }"#;

        let event = ClientEvent::from_json(json).unwrap();
        match event {
            ClientEvent::OpenTerminal(open) => {
                assert_eq!(open.term_id, "t1");
                assert_eq!(
                    open.kind,
                    TerminalKind::TmuxAttach {
                        session: "work".to_string(),
                        window: 2,
                    }
                );
                assert_eq!(open.cwd.as_deref(), Some("/tmp"));
            }
            other => panic!("expected OpenTerminal, got {:?}", other),
        }
    }

    #[test]
    fn test_tmux_attach_window_defaults_to_zero() {
        let json = r#"{
            "event": "open_terminal",
            "data": {"kind": {"type": "tmux_attach", "session": "main"}}
        }"#;

        let event = ClientEvent::from_json(json).unwrap();
        match event {
            ClientEvent::OpenTerminal(open) => {
                assert_eq!(
                    open.kind,
                    TerminalKind::TmuxAttach {
                        session: "main".to_string(),
                        window: 0,
                    }
                );
            }
            other => panic!("expected OpenTerminal, got {:?}", other),
        }
    }

    #[test]
    fn test_terminal_input_roundtrip() {
        let event = ClientEvent::TerminalInput(TerminalInput {
            term_id: "t1".to_string(),
            data: "echo hi\n".to_string(),
        });

        let json = event.to_json().unwrap();
        let decoded = ClientEvent::from_json(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_resize_with_omitted_dimensions() {
        let event = ClientEvent::from_json(
            r#"{"event":"terminal_resize","data":{"term_id":"t1","rows":40}}"#,
        )
        .unwrap();

        match event {
            ClientEvent::TerminalResize(resize) => {
                assert_eq!(resize.rows, Some(40));
                assert_eq!(resize.cols, None);
            }
            other => panic!("expected TerminalResize, got {:?}", other),
        }
    }

    #[test]
    fn test_server_event_json_shape() {
        let event = ServerEvent::TerminalOutput(TerminalOutput {
            term_id: "t2".to_string(),
            data: "hello".to_string(),
        });

        let json = event.to_json().unwrap();
        assert!(json.contains(r#""event":"terminal_output""#));
        assert!(json.contains(r#""term_id":"t2""#));

        let decoded = ServerEvent::from_json(&json).unwrap();
        assert_eq!(decoded.term_id(), "t2");
    }

    #[test]
    fn test_malformed_event_is_decode_error() {
        let result = ClientEvent::from_json(r#"{"event":"no_such_event","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_listing_types_roundtrip() {
        let session = TmuxSession {
            name: "work".to_string(),
            windows: 3,
            attached: true,
        };
        let json = serde_json::to_string(&session).unwrap();
        let decoded: TmuxSession = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, session);

        let window = TmuxWindow {
            index: 1,
            name: "editor".to_string(),
        };
        let json = serde_json::to_string(&window).unwrap();
        let decoded: TmuxWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, window);
    }
}
