//! HTTP and WebSocket surface of the daemon.
//!
//! - [`files`]: file tree, workspaces, versions, settings, code index
//! - [`ai`]: AI assistance and code execution
//! - [`terminal`]: the terminal WebSocket and the live session listing
//!
//! Filesystem work runs on the blocking pool; handlers only await it.

mod ai;
pub mod error;
mod files;
pub mod form;
mod terminal;

use std::io;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use protocol::{HealthResponse, TERMINAL_PATH};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

pub use error::ApiError;

use crate::ai::AiService;
use crate::config::Config;
use crate::exec::ExecRunner;
use crate::files::{CodeIndexer, Sandbox, SettingsStore};
use crate::terminal::SessionRegistry;

/// Largest accepted request body (uploads included).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Everything a handler may need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sandbox: Arc<Sandbox>,
    pub settings: SettingsStore,
    pub indexer: CodeIndexer,
    pub exec: ExecRunner,
    pub ai: AiService,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    /// Opens the workspace root and wires up every collaborator.
    pub fn new(config: Config, ai: AiService) -> io::Result<Self> {
        let sandbox = Sandbox::new(&config.workspace.root, &config.workspace.versions_dir)?;
        let settings = SettingsStore::new(sandbox.root(), &config.workspace.settings_file);
        let indexer = CodeIndexer::new(sandbox.root(), sandbox.versions().dir());
        let exec = ExecRunner::new(config.exec.clone());
        let sessions = Arc::new(SessionRegistry::new(config.terminal.max_sessions));

        Ok(Self {
            config: Arc::new(config),
            sandbox: Arc::new(sandbox),
            settings,
            indexer,
            exec,
            ai,
            sessions,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("root", &self.sandbox.root())
            .field("sessions", &self.sessions.count())
            .finish_non_exhaustive()
    }
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/terminal/sessions/", get(terminal::list_sessions))
        .route(TERMINAL_PATH, get(terminal::upgrade))
        .merge(files::routes())
        .merge(ai::routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.count(),
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Runs filesystem work on the blocking pool.
pub(crate) async fn blocking<F, T, E>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(Into::into)
}
