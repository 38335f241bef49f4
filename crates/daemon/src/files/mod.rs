//! Workspace file management.
//!
//! This module provides the file operations behind the editor:
//! - Sandboxed reads, writes, renames and deletes under one root
//! - Timestamped snapshots of overwritten files
//! - JSON settings at the root and per workspace
//! - A lightweight code index of Python and JavaScript sources
//!
//! # Security
//!
//! Every client-supplied path goes through [`Sandbox::resolve`], which
//! normalizes `..` lexically and resolves symlinks on the existing part of the
//! path before checking that the result is still under the root.

pub mod index;
pub mod sandbox;
pub mod settings;
pub mod versions;

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

pub use index::{CodeIndexer, IndexError};
pub use sandbox::{Sandbox, SandboxError};
pub use settings::{SettingsError, SettingsStore};
pub use versions::{VersionError, VersionStore};

/// Removes `.` and resolves `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalizes the longest existing ancestor of `path` and appends the
/// rest. `path` must already be normalized.
pub(crate) fn canonicalize_existing(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                    return Ok(path.to_path_buf());
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writes `contents` to a temp file next to `path`, then renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Path of `path` relative to `root`, with `/` separators.
pub(crate) fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/a/../../..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("a/./b")), PathBuf::from("a/b"));
    }

    #[test]
    fn test_canonicalize_existing_keeps_missing_tail() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let path = root.join("not/there/yet.txt");

        assert_eq!(canonicalize_existing(&path).unwrap(), path);
    }

    #[test]
    fn test_canonicalize_existing_follows_symlinks() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        assert_eq!(
            canonicalize_existing(&root.join("link/new.txt")).unwrap(),
            root.join("real/new.txt")
        );
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x/y/z.txt");

        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");

        write_atomic(&path, b"again").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"again");
    }

    #[test]
    fn test_relative_display() {
        assert_eq!(
            relative_display(Path::new("/w"), Path::new("/w/proj/src/main.py")),
            "proj/src/main.py"
        );
        assert_eq!(relative_display(Path::new("/w"), Path::new("/w")), "");
    }
}
