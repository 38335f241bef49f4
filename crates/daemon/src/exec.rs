//! One-shot code execution.
//!
//! Runs a snippet with the configured interpreter inside a throwaway
//! directory and captures its output. The run is bounded by a wall-clock
//! timeout after which the interpreter is killed. Nothing here touches the
//! workspace.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use protocol::{ExecResult, Language};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExecConfig;

/// Exit code reported when the run hit the timeout.
pub const EXIT_TIMEOUT: i32 = -1;

/// Exit code reported when the run could not be started.
pub const EXIT_NOT_STARTED: i32 = -2;

/// Errors that prevent a run from producing output.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The temporary directory or source file could not be created.
    #[error("failed to prepare run: {0}")]
    Prepare(#[source] io::Error),

    /// The interpreter could not be started or waited on.
    #[error("{0}")]
    Spawn(#[source] io::Error),

    /// The run exceeded its time limit.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs code snippets.
#[derive(Debug, Clone)]
pub struct ExecRunner {
    config: ExecConfig,
}

impl ExecRunner {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    /// Runs `code` and always returns a result; failures are reported in
    /// `stderr` with a negative exit code.
    pub async fn run(&self, code: &str, language: Language) -> ExecResult {
        match self.try_run(code, language).await {
            Ok(result) => result,
            Err(ExecError::Timeout(limit)) => {
                debug!(language = %language, ?limit, "Execution timed out");
                ExecResult {
                    stdout: String::new(),
                    stderr: "Execution timed out.".to_string(),
                    exit_code: EXIT_TIMEOUT,
                }
            }
            Err(e) => {
                warn!(language = %language, error = %e, "Execution failed to start");
                ExecResult {
                    stdout: String::new(),
                    stderr: format!("Execution error: {e}"),
                    exit_code: EXIT_NOT_STARTED,
                }
            }
        }
    }

    /// Runs `code`, reporting failures to start and timeouts as errors.
    pub async fn try_run(&self, code: &str, language: Language) -> Result<ExecResult, ExecError> {
        let workdir = tempfile::tempdir().map_err(ExecError::Prepare)?;
        let script = workdir.path().join(language.file_name());
        tokio::fs::write(&script, code)
            .await
            .map_err(ExecError::Prepare)?;

        let child = Command::new(self.interpreter(language))
            .arg(&script)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;
        debug!(language = %language, pid = ?child.id(), "Started execution");

        let limit = self.config.timeout();
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output.map_err(ExecError::Spawn)?,
            Err(_) => return Err(ExecError::Timeout(limit)),
        };

        let exit_code = output
            .status
            .code()
            .or_else(|| output.status.signal().map(|signal| 128 + signal))
            .unwrap_or(EXIT_NOT_STARTED);

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }

    fn interpreter(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.config.python,
            Language::Javascript => &self.config.node,
        }
    }
}
