//! # OnPoint Protocol Library
//!
//! This crate holds the wire types exchanged between the OnPoint daemon and
//! the browser editor.
//!
//! ## Overview
//!
//! The daemon exposes two surfaces:
//!
//! - **HTTP/JSON**: file tree operations, file versions, settings, the code
//!   index, code execution and AI assistance. Every request and response body
//!   is defined in [`messages`].
//! - **Terminal WebSocket**: a raw byte stream. There is no envelope on this
//!   channel; inbound frames are keystrokes and outbound frames are terminal
//!   output, so nothing about it lives here beyond [`TERMINAL_PATH`].
//!
//! Errors on the HTTP surface always carry an [`ErrorBody`].
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::messages::{ExecRequest, Language};
//!
//! let request = ExecRequest {
//!     code: "print(1 + 1)".to_string(),
//!     language: "python".to_string(),
//! };
//! let language: Language = request.language.parse().unwrap();
//! assert_eq!(language.file_name(), "script.py");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: request and response bodies
//! - [`error`]: error body and parse errors

pub mod error;
pub mod messages;

pub use error::{ErrorBody, ProtocolError, Result};
pub use messages::{
    AnalysisResponse, AnswerResponse, ChatHistoryRequest, ChatResponse, ChatRole, ChatTurn,
    CodeIndexEntry, CodeIndexResponse, CodeRequest, ExecRequest, ExecResult, FeedbackResponse,
    FileEntry, HealthResponse, Language, QuestionRequest, ReviewResponse, SessionSummary,
    StatusResponse, SuggestChangesResponse, SuggestionResponse, VersionEntry, WorkspaceEntry,
};

/// Path of the terminal WebSocket endpoint.
pub const TERMINAL_PATH: &str = "/ws/terminal/";
