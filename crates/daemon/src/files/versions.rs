//! Timestamped file snapshots.
//!
//! Before a file is overwritten, its current content is copied into the
//! versions directory under the same relative location, named
//! `<name>.<YYYYmmddHHMMSS>`. Snapshots taken within the same second get a
//! `-N` suffix so none is ever overwritten.

use std::cmp::Reverse;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use protocol::VersionEntry;
use thiserror::Error;
use tracing::debug;

use super::{canonicalize_existing, normalize, relative_display};

/// Timestamp format of snapshot names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Number of digits in a snapshot timestamp.
const TIMESTAMP_LEN: usize = 14;

/// Errors that can occur while managing snapshots.
#[derive(Debug, Error)]
pub enum VersionError {
    /// No snapshot exists at the given path.
    #[error("Version not found")]
    NotFound(String),

    /// The snapshot path points outside the versions directory.
    #[error("Invalid version path")]
    InvalidPath(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Snapshot storage under the workspace root.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
    dir: PathBuf,
}

impl VersionStore {
    /// Opens (and creates) the versions directory `dir_name` under `root`.
    ///
    /// `root` must already be canonical.
    pub fn new(root: &Path, dir_name: &str) -> io::Result<Self> {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            root: root.to_path_buf(),
            dir,
        })
    }

    /// Returns the versions directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies the current content of `file` into the store.
    ///
    /// Returns the snapshot path, or `None` when there was nothing to save.
    pub fn snapshot(&self, file: &Path) -> Result<Option<PathBuf>, VersionError> {
        if !file.is_file() {
            return Ok(None);
        }
        let Some((mirror_dir, name)) = self.mirror_of(file) else {
            return Ok(None);
        };
        fs::create_dir_all(&mirror_dir)?;

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut target = mirror_dir.join(format!("{name}.{timestamp}"));
        let mut seq = 1u32;
        while target.exists() {
            target = mirror_dir.join(format!("{name}.{timestamp}-{seq}"));
            seq += 1;
        }

        fs::copy(file, &target)?;
        debug!(file = ?file, snapshot = ?target, "Saved file snapshot");
        Ok(Some(target))
    }

    /// Lists the snapshots of `file`, newest first.
    pub fn list(&self, file: &Path) -> Result<Vec<VersionEntry>, VersionError> {
        let Some((mirror_dir, name)) = self.mirror_of(file) else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(&mirror_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = parse_suffix(&name, &filename) else {
                continue;
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let suffix = filename[name.len() + 1..].to_string();
            found.push((
                key,
                VersionEntry {
                    path: relative_display(&self.dir, &entry.path()),
                    timestamp: suffix,
                    filename,
                },
            ));
        }

        found.sort_by_key(|(key, _)| Reverse(key.clone()));
        Ok(found.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Reads a snapshot by its path relative to the versions directory.
    pub fn read(&self, version: &str) -> Result<Vec<u8>, VersionError> {
        let path = self.resolve(version)?;
        Ok(fs::read(path)?)
    }

    /// Replaces `file` with a snapshot, saving the current content first.
    pub fn restore(&self, file: &Path, version: &str) -> Result<(), VersionError> {
        let source = self.resolve(version)?;
        self.snapshot(file)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, file)?;
        debug!(file = ?file, snapshot = ?source, "Restored file snapshot");
        Ok(())
    }

    /// Location of `file`'s snapshots: the mirrored directory and the file name.
    ///
    /// Files outside the root or inside the store itself have none.
    fn mirror_of(&self, file: &Path) -> Option<(PathBuf, String)> {
        if file.starts_with(&self.dir) {
            return None;
        }
        let relative = file.strip_prefix(&self.root).ok()?;
        let name = relative.file_name()?.to_string_lossy().into_owned();
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        Some((self.dir.join(parent), name))
    }

    fn resolve(&self, version: &str) -> Result<PathBuf, VersionError> {
        let candidate = normalize(&self.dir.join(version));
        let resolved = canonicalize_existing(&candidate)?;
        if !resolved.starts_with(&self.dir) || resolved == self.dir {
            return Err(VersionError::InvalidPath(version.to_string()));
        }
        if !resolved.is_file() {
            return Err(VersionError::NotFound(version.to_string()));
        }
        Ok(resolved)
    }
}

/// Sort key of a snapshot of `name`, if `filename` is one.
fn parse_suffix(name: &str, filename: &str) -> Option<(String, u32)> {
    let suffix = filename.strip_prefix(name)?.strip_prefix('.')?;
    let (timestamp, seq) = match suffix.split_once('-') {
        Some((timestamp, seq)) => (timestamp, seq.parse().ok()?),
        None => (suffix, 0),
    };
    if timestamp.len() != TIMESTAMP_LEN || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((timestamp.to_string(), seq))
}
