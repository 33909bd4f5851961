//! # webmux Daemon Library
//!
//! This crate provides the daemon (server) side of webmux, bridging remote
//! client connections to local interactive processes over pseudo-terminals.
//!
//! ## Overview
//!
//! The daemon multiplexes many terminals per connection and many
//! connections per server. It provides:
//!
//! - **PTY Session Management**: spawn login shells or attach to existing
//!   tmux session windows behind a PTY
//! - **Reader Pumps**: one task per live session forwarding PTY output to
//!   the owning connection
//! - **Tmux Listings**: read-only session/window resolution for attach
//!   targets
//! - **WebSocket Transport**: a thin adapter dispatching client events to
//!   the session manager
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      WebSocket Server                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                    Session Manager                       │  │
//! │  │   open / write / resize / close / close_all              │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐     │
//! │  │   Registry   │  │   Launcher   │  │  Tmux Resolver    │     │
//! │  └──────────────┘  └──────────────┘  └───────────────────┘     │
//! │                                                                 │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │        Reader Pumps (one task per live session)          │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY launching, registry, pumps and control operations
//! - [`tmux`]: Read-only tmux session/window resolution
//! - [`server`]: WebSocket transport adapter

pub mod config;
pub mod server;
pub mod session;
pub mod tmux;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    ConnectionId, EventSender, Registry, SessionManager, SessionRecord, SpawnError,
};

// Re-export server types for convenience
pub use server::Server;
