//! Request and response bodies for the OnPoint HTTP surface.
//!
//! Field names follow what the browser editor already sends and reads, so
//! several structs keep snake_case keys such as `is_dir` and `exit_code`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

// ============================================================================
// File tree
// ============================================================================

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not a path).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A top-level workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    /// Directory name.
    pub name: String,
    /// Path relative to the workspace root.
    pub path: String,
}

/// Acknowledgement for mutating requests.
///
/// Only `status` is always present; the other fields echo the names the
/// request operated on where the client expects them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Short outcome keyword ("ok", "created", "deleted", ...).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl StatusResponse {
    /// Create a bare status response.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    /// Attach the affected name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach the old and new names of a rename.
    pub fn with_rename(mut self, old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        self.old_name = Some(old_name.into());
        self.new_name = Some(new_name.into());
        self
    }

    /// Attach the affected path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a count.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

// ============================================================================
// Versions
// ============================================================================

/// A saved snapshot of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Snapshot file name (`<name>.<timestamp>`).
    pub filename: String,
    /// Timestamp suffix, `YYYYmmddHHMMSS`.
    pub timestamp: String,
    /// Path relative to the versions directory, used to fetch or restore it.
    pub path: String,
}

// ============================================================================
// Code execution
// ============================================================================

/// Interpreters supported by the execution helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    /// File name the source is written to before running it.
    pub fn file_name(&self) -> &'static str {
        match self {
            Language::Python => "script.py",
            Language::Javascript => "script.js",
        }
    }

    /// Wire name of the language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            other => Err(ProtocolError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Request to run a snippet of code.
///
/// `language` stays a plain string so an unknown value is reported as an
/// unsupported language instead of a body deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub code: String,
    pub language: String,
}

/// Captured outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `-1` on timeout and `-2` when the run never started.
    pub exit_code: i32,
}

// ============================================================================
// AI assistance
// ============================================================================

fn default_language() -> String {
    "python".to_string()
}

/// Code plus its language, used by suggest/review/analyze/check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

/// Speaker of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Label used when the history is flattened into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Chat request carrying the whole conversation so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryRequest {
    pub history: Vec<ChatTurn>,
    /// Directory the user is looking at, relative to the workspace root.
    #[serde(default)]
    pub current_directory: Option<String>,
}

/// A free-form question about some code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub review: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
}

/// Suggested rewrite of a whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestChangesResponse {
    /// Unified diff from `original` to `suggested`.
    pub diff: String,
    pub suggested: String,
    pub original: String,
    pub filename: String,
    /// Path relative to the workspace root.
    pub path: String,
}

// ============================================================================
// Code index
// ============================================================================

/// One indexed directory or source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIndexEntry {
    /// Path relative to the workspace root.
    pub path: String,
    /// `directory`, or the file extension without the dot.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl CodeIndexEntry {
    /// Entry for a directory.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: "directory".to_string(),
            functions: None,
            classes: None,
            snippet: None,
        }
    }

    /// Whether this entry describes a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == "directory"
    }
}

/// Stored code index of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeIndexResponse {
    pub code_index: Vec<CodeIndexEntry>,
}

// ============================================================================
// Daemon status
// ============================================================================

/// Liveness probe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of live terminal sessions.
    pub sessions: usize,
}

/// Summary of a live terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub pid: Option<u32>,
    /// Lifecycle state name (`starting`, `active`, `closing`, `closed`).
    pub state: String,
}
