//! File operations confined to the workspace root.
//!
//! Every operation takes a client-supplied path relative to the root and
//! refuses anything that resolves outside of it, including via `..`,
//! absolute paths or symlinks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use protocol::{FileEntry, WorkspaceEntry};
use thiserror::Error;
use tracing::{debug, info};

use super::versions::{VersionError, VersionStore};
use super::{canonicalize_existing, normalize, relative_display, write_atomic};

/// Errors that can occur during sandboxed file operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The path resolves outside the workspace root.
    #[error("Invalid path")]
    OutsideRoot(String),

    /// The target does not exist or has the wrong type.
    #[error("{what} not found")]
    NotFound { what: &'static str, path: String },

    /// The operation would affect the workspace root itself.
    #[error("Operation not allowed on the workspace root")]
    RootNotAllowed,

    /// A workspace name is empty or contains a path separator.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The destination of a create or rename already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Snapshot failure while writing.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SandboxError {
    fn not_found(what: &'static str, path: &str) -> Self {
        SandboxError::NotFound {
            what,
            path: path.to_string(),
        }
    }
}

/// Sandboxed view of the workspace root.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    versions: VersionStore,
    versions_dir_name: String,
}

impl Sandbox {
    /// Opens the sandbox, creating the root and versions directory if needed.
    pub fn new(root: &Path, versions_dir: &str) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        let versions = VersionStore::new(&root, versions_dir)?;
        info!(root = ?root, "Workspace root ready");
        Ok(Self {
            root,
            versions,
            versions_dir_name: versions_dir.to_string(),
        })
    }

    /// Returns the canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the snapshot store.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Resolves a client path to an absolute path under the root.
    ///
    /// The path does not need to exist. An empty path is the root. The
    /// versions directory and everything below it are rejected like paths
    /// outside the root; snapshots are only reachable through the version
    /// operations.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, SandboxError> {
        let candidate = normalize(&self.root.join(rel));
        let resolved = canonicalize_existing(&candidate)?;
        if !resolved.starts_with(&self.root) {
            debug!(path = %rel, resolved = ?resolved, "Rejected path outside workspace");
            return Err(SandboxError::OutsideRoot(rel.to_string()));
        }
        if resolved.starts_with(self.versions.dir()) {
            debug!(path = %rel, "Rejected path into the versions directory");
            return Err(SandboxError::OutsideRoot(rel.to_string()));
        }
        Ok(resolved)
    }

    /// Path of `abs` relative to the root, with `/` separators.
    pub fn relative(&self, abs: &Path) -> String {
        relative_display(&self.root, abs)
    }

    /// Lists a directory, directories first. The versions directory is hidden.
    pub fn list_dir(&self, rel: &str) -> Result<Vec<FileEntry>, SandboxError> {
        let dir = self.resolve(rel)?;
        if !dir.is_dir() {
            return Err(SandboxError::not_found("Directory", rel));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path == self.versions.dir() {
                continue;
            }
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: path.is_dir(),
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });
        Ok(entries)
    }

    /// Reads a file.
    pub fn read_file(&self, rel: &str) -> Result<Vec<u8>, SandboxError> {
        let path = self.resolve(rel)?;
        if !path.is_file() {
            return Err(SandboxError::not_found("File", rel));
        }
        Ok(fs::read(path)?)
    }

    /// Writes a file, snapshotting the previous content if it existed.
    ///
    /// Returns the snapshot path, if one was taken.
    pub fn write_file(&self, rel: &str, contents: &[u8]) -> Result<Option<PathBuf>, SandboxError> {
        let path = self.resolve(rel)?;
        if path == self.root || path.is_dir() {
            return Err(SandboxError::not_found("File", rel));
        }
        let snapshot = self.versions.snapshot(&path)?;
        write_atomic(&path, contents)?;
        debug!(path = %rel, bytes = contents.len(), snapshot = snapshot.is_some(), "Wrote file");
        Ok(snapshot)
    }

    /// Stores uploaded bytes without taking a snapshot.
    pub fn upload_file(&self, rel: &str, contents: &[u8]) -> Result<(), SandboxError> {
        let path = self.resolve(rel)?;
        if path == self.root || path.is_dir() {
            return Err(SandboxError::not_found("File", rel));
        }
        write_atomic(&path, contents)?;
        debug!(path = %rel, bytes = contents.len(), "Stored upload");
        Ok(())
    }

    /// Deletes a file.
    pub fn delete_file(&self, rel: &str) -> Result<(), SandboxError> {
        let path = self.resolve(rel)?;
        if !path.is_file() {
            return Err(SandboxError::not_found("File", rel));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Creates a directory and any missing parents.
    pub fn create_dir(&self, rel: &str) -> Result<(), SandboxError> {
        let path = self.resolve(rel)?;
        fs::create_dir_all(path)?;
        Ok(())
    }

    /// Deletes a directory recursively. The root itself cannot be deleted.
    pub fn delete_dir(&self, rel: &str) -> Result<(), SandboxError> {
        let path = self.resolve(rel)?;
        if path == self.root {
            return Err(SandboxError::RootNotAllowed);
        }
        if !path.is_dir() {
            return Err(SandboxError::not_found("Folder", rel));
        }
        fs::remove_dir_all(path)?;
        Ok(())
    }

    /// Renames a file or directory. The destination must not exist.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), SandboxError> {
        let from = self.resolve(old)?;
        let to = self.resolve(new)?;
        if from == self.root || to == self.root {
            return Err(SandboxError::RootNotAllowed);
        }
        if !from.exists() {
            return Err(SandboxError::not_found("Path", old));
        }
        if to.exists() {
            return Err(SandboxError::AlreadyExists(new.to_string()));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
        info!(from = %old, to = %new, "Renamed path");
        Ok(())
    }

    /// Lists the top-level workspace directories, by name.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceEntry>, SandboxError> {
        let mut workspaces: Vec<WorkspaceEntry> = fs::read_dir(&self.root)?
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| *name != self.versions_dir_name)
            .map(|name| WorkspaceEntry {
                path: name.clone(),
                name,
            })
            .collect();
        workspaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workspaces)
    }

    /// Creates a top-level workspace directory. Creating an existing one is
    /// not an error.
    pub fn create_workspace(&self, name: &str) -> Result<PathBuf, SandboxError> {
        let path = self.workspace_path(name)?;
        fs::create_dir_all(&path)?;
        info!(workspace = %name, "Created workspace");
        Ok(path)
    }

    /// Deletes a top-level workspace directory and everything in it.
    pub fn delete_workspace(&self, name: &str) -> Result<(), SandboxError> {
        let path = self.workspace_path(name)?;
        if !path.is_dir() {
            return Err(SandboxError::not_found("Workspace", name));
        }
        fs::remove_dir_all(&path)?;
        info!(workspace = %name, "Deleted workspace");
        Ok(())
    }

    /// Renames a top-level workspace directory.
    pub fn rename_workspace(&self, old: &str, new: &str) -> Result<(), SandboxError> {
        let from = self.workspace_path(old)?;
        let to = self.workspace_path(new)?;
        if !from.is_dir() {
            return Err(SandboxError::not_found("Workspace", old));
        }
        if to.exists() {
            return Err(SandboxError::AlreadyExists(new.to_string()));
        }
        fs::rename(&from, &to)?;
        info!(from = %old, to = %new, "Renamed workspace");
        Ok(())
    }

    /// Resolves an existing directory for workspace settings.
    pub fn workspace_dir(&self, name: &str) -> Result<PathBuf, SandboxError> {
        let path = self.resolve(name)?;
        if !path.is_dir() {
            return Err(SandboxError::not_found("Workspace", name));
        }
        Ok(path)
    }

    fn workspace_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0'])
            && name != self.versions_dir_name;
        if !valid {
            return Err(SandboxError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}
