//! # webmux Protocol Library
//!
//! This crate provides the wire-level event definitions for the webmux
//! terminal bridge.
//!
//! ## Overview
//!
//! The protocol crate is shared between the daemon and its clients. It
//! defines:
//!
//! - **Client events**: open/input/resize/close requests for terminals
//! - **Server events**: ready/output/error/closed notifications
//! - **Listing types**: tmux session and window descriptions consumed by
//!   the session-listing layer
//!
//! Events are serialized as JSON, one event per transport frame:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Terminal Events                │  JSON-encoded
//! ├─────────────────────────────────────────┤
//! │         Transport (WebSocket)           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::messages::{ClientEvent, ServerEvent, TerminalReady};
//!
//! // Decode an inbound client event
//! let event = ClientEvent::from_json(
//!     r#"{"event":"open_terminal","data":{"kind":{"type":"shell"}}}"#,
//! ).unwrap();
//!
//! // Encode an outbound notification
//! let ready = ServerEvent::TerminalReady(TerminalReady {
//!     term_id: "default".to_string(),
//! });
//! let frame = ready.to_json().unwrap();
//! assert!(frame.contains("terminal_ready"));
//! # let _ = event;
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Event and listing definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientEvent, ServerEvent, TerminalId, TerminalKind, TmuxSession, TmuxWindow,
    DEFAULT_TERMINAL_ID,
};
