//! Error types for the protocol crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error type for values that fail to parse from their wire form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The execution helper only knows a fixed set of interpreters.
    #[error("Unsupported language")]
    UnsupportedLanguage(String),

    /// Chat history entries must be from the user or the assistant.
    #[error("unknown chat role: {0}")]
    UnknownRole(String),
}

/// Result type alias using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// JSON body returned with every non-2xx HTTP response.
///
/// The browser client reads `detail` and shows it in a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub detail: String,
}

impl ErrorBody {
    /// Create an error body from any displayable message.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
