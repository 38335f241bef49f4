//! JSON settings documents.
//!
//! Global settings live in the settings file at the workspace root; each
//! workspace directory may carry its own copy of the same file. The daemon
//! stores whatever JSON the editor sends and only ever adds the `code_index`
//! key itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::write_atomic;

/// Errors that can occur while reading or writing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The request body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The stored settings file is not valid JSON.
    #[error("settings file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Reads and writes settings files.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    root: PathBuf,
    file_name: String,
}

impl SettingsStore {
    /// Creates a store for `file_name` documents, global ones under `root`.
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            file_name: file_name.to_string(),
        }
    }

    /// Parses a settings document sent by the client.
    pub fn parse(raw: &str) -> Result<Value, SettingsError> {
        serde_json::from_str(raw).map_err(SettingsError::InvalidJson)
    }

    /// Global settings, `{}` when none were saved yet.
    pub fn global(&self) -> Result<Value, SettingsError> {
        self.load(&self.root)
    }

    /// Replaces the global settings.
    pub fn save_global(&self, value: &Value) -> Result<(), SettingsError> {
        self.store(&self.root, value)
    }

    /// Settings of the workspace directory `dir`, `{}` when none were saved.
    pub fn workspace(&self, dir: &Path) -> Result<Value, SettingsError> {
        self.load(dir)
    }

    /// Replaces the settings of the workspace directory `dir`.
    pub fn save_workspace(&self, dir: &Path, value: &Value) -> Result<(), SettingsError> {
        self.store(dir, value)
    }

    /// Read-modify-write of a directory's settings object.
    ///
    /// A missing, corrupt or non-object document is replaced by a fresh
    /// object.
    pub fn update<F>(&self, dir: &Path, update: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut object = match self.load(dir) {
            Ok(Value::Object(object)) => object,
            Ok(_) => Map::new(),
            Err(SettingsError::Corrupt { path, source }) => {
                warn!(path = ?path, error = %source, "Replacing corrupt settings file");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        update(&mut object);
        self.store(dir, &Value::Object(object))
    }

    fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }

    fn load(&self, dir: &Path) -> Result<Value, SettingsError> {
        let path = self.path_in(dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Value::Object(Map::new()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|source| SettingsError::Corrupt { path, source })
    }

    fn store(&self, dir: &Path, value: &Value) -> Result<(), SettingsError> {
        let json = serde_json::to_vec_pretty(value).map_err(|e| SettingsError::Io(e.into()))?;
        write_atomic(&self.path_in(dir), &json)?;
        Ok(())
    }
}
