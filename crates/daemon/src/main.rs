//! OnPoint Daemon
//!
//! Backend service for the OnPoint browser code editor.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use onpoint_daemon::config::{default_config_path, Config};
use onpoint_daemon::Server;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// OnPoint Daemon - backend service for the browser code editor.
#[derive(Parser, Debug)]
#[command(name = "onpoint-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server and run until SIGINT or SIGTERM
    Start {
        /// Address to listen on, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Validate the configuration and print the effective settings
    Check,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Init { force } = cli.command {
        return init_config(&config_path, force);
    }

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Start { bind: Some(addr) } = &cli.command {
        config.server.bind_addr = addr.clone();
    }

    let _log_guard = init_tracing(cli.verbose, &config)?;
    tracing::info!(config = ?config_path, "OnPoint daemon starting...");

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Start { .. } => run_server(config).await?,
        Commands::Check => {
            println!("# Configuration OK ({})", config_path.display());
            print!("{}", config.to_toml()?);
        }
        Commands::Init { .. } => {} // handled above
    }

    Ok(())
}

/// Initializes logging to stderr and, when `log_dir` is set, to a daily file.
///
/// `RUST_LOG` takes precedence over `--verbose` and the configured level.
fn init_tracing(verbose: bool, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = &config.server.log_dir else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("onpoint-daemon")
        .filename_suffix("log")
        .build(dir)
        .context("Failed to create log file appender")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

/// Writes the default configuration to `path`.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Runs the server until a shutdown signal arrives.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let mut server = Server::new(config)?;
    let addr = server.bind().await?;
    tracing::info!("Serving on http://{}", addr);

    let signals = ShutdownSignals::register()?;
    let handle = server.handle();
    tokio::spawn(async move {
        signals.recv().await;
        handle.shutdown();
    });

    server.run().await
}

/// SIGTERM and SIGINT listeners.
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    fn register() -> anyhow::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?,
        })
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT).
    async fn recv(mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }
}
