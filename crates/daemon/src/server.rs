//! Server lifecycle.
//!
//! [`Server`] owns the shared [`AppState`], binds the listener and serves the
//! router until its cancellation token fires. Shutdown stops accepting
//! connections and closes every live terminal session through the same
//! idempotent teardown a disconnect uses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::AiService;
use crate::config::Config;
use crate::http::{router, AppState};

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state, not started.
    Stopped,
    /// Listener bound, not serving yet.
    Starting,
    /// Serving requests.
    Running,
    /// Draining connections and closing terminal sessions.
    ShuttingDown,
}

/// The HTTP/WebSocket server.
pub struct Server {
    app: AppState,
    state: Arc<RwLock<ServerState>>,
    shutdown_token: CancellationToken,
    /// Bound listener, populated by `bind` and consumed by `run`.
    listener: Option<TcpListener>,
}

/// Cloneable control handle for a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    app: AppState,
    state: Arc<RwLock<ServerState>>,
    shutdown_token: CancellationToken,
}

impl Server {
    /// Creates a server backed by the configured AI service.
    pub fn new(config: Config) -> Result<Self> {
        let ai = AiService::from_config(&config.ai).context("Failed to create AI client")?;
        Self::with_ai(config, ai)
    }

    /// Creates a server with the given AI service.
    pub fn with_ai(config: Config, ai: AiService) -> Result<Self> {
        let root = config.workspace.root.clone();
        let app = AppState::new(config, ai)
            .with_context(|| format!("Failed to open workspace root: {}", root.display()))?;

        Ok(Self {
            app,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown_token: CancellationToken::new(),
            listener: None,
        })
    }

    /// Returns a handle for observing and stopping the server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            app: self.app.clone(),
            state: Arc::clone(&self.state),
            shutdown_token: self.shutdown_token.clone(),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Binds the configured address and returns the actual one.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let addr = &self.app.config.server.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let local = listener.local_addr()?;

        self.listener = Some(listener);
        *self.state.write().await = ServerState::Starting;
        info!(addr = %local, "Listening");
        Ok(local)
    }

    /// Serves until the shutdown token is cancelled.
    ///
    /// Binds first if [`Server::bind`] was not called.
    pub async fn run(mut self) -> Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                self.bind().await?;
                self.listener.take().context("listener missing after bind")?
            }
        };

        *self.state.write().await = ServerState::Running;
        info!(root = ?self.app.sandbox.root(), "Server started");

        let app = router(self.app.clone());
        let handle = self.handle();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                handle.shutdown_token.cancelled().await;
                *handle.state.write().await = ServerState::ShuttingDown;
                info!("Shutting down, closing terminal sessions");
                handle.app.sessions.close_all().await;
            })
            .await
            .context("HTTP server failed")?;

        let late = self.app.sessions.close_all().await;
        if late > 0 {
            debug!(closed = late, "Closed sessions opened during shutdown");
        }

        *self.state.write().await = ServerState::Stopped;
        info!("Server stopped");
        Ok(())
    }
}

impl ServerHandle {
    /// Shared application state.
    pub fn app(&self) -> &AppState {
        &self.app
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Requests a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Token cancelled when shutdown is requested.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("app", &self.app)
            .field("cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}
