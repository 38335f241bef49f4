//! AI assistance for the editor.
//!
//! - [`TextGenerator`]: the seam to a hosted language model
//! - [`gemini`]: the production generator
//! - [`prompts`]: prompt builders per endpoint
//! - [`diff`]: unified diff used to present suggested rewrites
//!
//! [`AiService`] never fails: a generation error becomes an inline
//! `[AI error: ...]` answer so the editor can show it where the answer would
//! have appeared.

pub mod diff;
pub mod gemini;
pub mod prompts;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use protocol::{ChatTurn, SuggestChangesResponse};
use thiserror::Error;

pub use gemini::GeminiClient;
pub use prompts::DirectoryContext;

use crate::config::AiConfig;

/// Errors from a text generator.
#[derive(Debug, Error)]
pub enum AiError {
    /// No API key was configured.
    #[error("GEMINI_API_KEY not set")]
    NotConfigured,

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API answer could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The API answer carried no text.
    #[error("empty response")]
    EmptyResponse,
}

/// Something that turns a prompt into text.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, AiError>>;
}

/// Prompt-level operations on top of a [`TextGenerator`].
#[derive(Clone)]
pub struct AiService {
    generator: Arc<dyn TextGenerator>,
}

impl AiService {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Service backed by the configured Gemini model.
    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        let client = GeminiClient::new(config)?;
        if !client.is_configured() {
            tracing::warn!("GEMINI_API_KEY not set, AI endpoints will answer with an error");
        }
        Ok(Self::new(Arc::new(client)))
    }

    /// Generates text for `prompt`, folding failures into the answer.
    pub async fn complete(&self, prompt: &str) -> String {
        match self.generator.generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "AI generation failed");
                format!("[AI error: {e}]")
            }
        }
    }

    pub async fn suggest(&self, language: &str, code: &str) -> String {
        self.complete(&prompts::suggest(language, code)).await
    }

    pub async fn review(&self, language: &str, code: &str) -> String {
        self.complete(&prompts::review(language, code)).await
    }

    pub async fn chat(&self, history: &[ChatTurn], directory: Option<&DirectoryContext>) -> String {
        self.complete(&prompts::chat(history, directory)).await
    }

    pub async fn next_lines(&self, language: &str, code: &str) -> String {
        self.complete(&prompts::next_lines(language, code)).await
    }

    pub async fn analyze(&self, language: &str, code: &str) -> String {
        self.complete(&prompts::analyze(language, code)).await
    }

    pub async fn check(&self, language: &str, code: &str) -> String {
        self.complete(&prompts::check(language, code)).await
    }

    pub async fn answer(&self, language: &str, code: &str, question: &str) -> String {
        self.complete(&prompts::answer(language, code, question)).await
    }

    /// Asks for a rewrite of a file and diffs it against the original.
    ///
    /// `path` is relative to the workspace root; `listing` describes the
    /// file's directory.
    pub async fn suggest_changes(
        &self,
        path: &str,
        filename: &str,
        listing: &str,
        original: String,
    ) -> SuggestChangesResponse {
        let prompt = prompts::suggest_changes(path, listing, filename, &original);
        let suggested = self.complete(&prompt).await;
        let diff = diff::unified_diff(
            &original,
            &suggested,
            &format!("original/{filename}"),
            &format!("suggested/{filename}"),
        );
        SuggestChangesResponse {
            diff,
            suggested,
            original,
            filename: filename.to_string(),
            path: path.to_string(),
        }
    }
}

impl std::fmt::Debug for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Mutex;

    /// Echoes a canned answer and records every prompt.
    struct Canned {
        answer: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl TextGenerator for Canned {
        fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, AiError>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let result = self.answer.clone().map_err(|_| AiError::EmptyResponse);
            async move { result }.boxed()
        }
    }

    fn canned(answer: Result<&str, ()>) -> (Arc<Canned>, AiService) {
        let generator = Arc::new(Canned {
            answer: answer.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        });
        (generator.clone(), AiService::new(generator))
    }

    #[tokio::test]
    async fn test_complete_returns_answer() {
        let (generator, service) = canned(Ok("do this"));
        assert_eq!(service.review("python", "x = 1").await, "do this");
        assert!(generator.prompts.lock().unwrap()[0].contains("x = 1"));
    }

    #[tokio::test]
    async fn test_failure_is_inline() {
        let (_generator, service) = canned(Err(()));
        assert_eq!(service.suggest("python", "").await, "[AI error: empty response]");
    }

    #[tokio::test]
    async fn test_missing_key_is_inline() {
        let service = AiService::from_config(&AiConfig::default()).unwrap();
        assert_eq!(
            service.check("python", "x").await,
            "[AI error: GEMINI_API_KEY not set]"
        );
    }

    #[tokio::test]
    async fn test_suggest_changes_diffs_suggestion() {
        let (_generator, service) = canned(Ok("a\nB\nc"));
        let response = service
            .suggest_changes("proj/f.py", "f.py", "[F] f.py", "a\nb\nc\n".to_string())
            .await;

        assert_eq!(response.suggested, "a\nB\nc");
        assert_eq!(response.path, "proj/f.py");
        assert!(response.diff.starts_with("--- original/f.py\n+++ suggested/f.py\n@@"));
        assert!(response.diff.contains("\n-b\n+B"));
    }
}
