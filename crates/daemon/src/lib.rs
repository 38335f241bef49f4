//! # OnPoint Daemon Library
//!
//! This crate provides the backend of the OnPoint browser code editor: an
//! HTTP/WebSocket server that exposes a workspace directory, an interactive
//! shell and AI assistance to the browser.
//!
//! ## Overview
//!
//! - **Terminal**: one PTY-backed shell per WebSocket connection, relayed by
//!   two concurrent pumps and torn down exactly once
//! - **Files**: sandboxed file tree operations with timestamped snapshots,
//!   JSON settings and a code index
//! - **Exec**: one-shot Python and JavaScript runs with a timeout
//! - **AI**: prompt-level helpers over a hosted text generation model
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Server                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                 HTTP router (axum)                     │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────┐  ┌────────┐  │
//! │  │   Terminal   │  │    Files     │  │ Exec  │  │   AI   │  │
//! │  │ session/relay│  │ sandbox/vers │  │       │  │        │  │
//! │  └──────────────┘  └──────────────┘  └───────┘  └────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use onpoint_daemon::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut server = Server::new(config)?;
//!     server.bind().await?;
//!
//!     let handle = server.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     server.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`terminal`]: PTY sessions, the duplex relay and the session registry
//! - [`files`]: Sandbox, versions, settings and code index
//! - [`exec`]: Code execution helper
//! - [`ai`]: AI generation service
//! - [`http`]: Router, handlers and error mapping
//! - [`server`]: Server lifecycle

pub mod ai;
pub mod config;
pub mod exec;
pub mod files;
pub mod http;
pub mod server;
pub mod terminal;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export terminal types for convenience
pub use terminal::{
    PtySession, Relay, RelayReport, SessionError, SessionId, SessionRegistry, SessionState,
};

// Re-export collaborator types for convenience
pub use ai::{AiError, AiService, TextGenerator};
pub use exec::ExecRunner;
pub use files::{CodeIndexer, Sandbox, SettingsStore, VersionStore};

// Re-export server types for convenience
pub use http::{router, ApiError, AppState};
pub use server::{Server, ServerHandle, ServerState};
