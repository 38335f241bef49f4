//! Code index of a directory tree.
//!
//! The index lists every subdirectory and every `.py`, `.js` and `.json`
//! file with its first lines and, for Python and JavaScript, the names of
//! the functions and classes it defines. It is stored in the directory's
//! settings under `code_index` and fed to the chat assistant as context.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use protocol::CodeIndexEntry;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::relative_display;
use super::settings::{SettingsError, SettingsStore};

/// Settings key the index is stored under.
pub const CODE_INDEX_KEY: &str = "code_index";

/// Number of leading lines kept as a file's snippet.
const SNIPPET_LINES: usize = 20;

/// Entries shown in a directory summary before it is truncated.
pub const SUMMARY_MAX_ENTRIES: usize = 20;

static PY_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+([A-Za-z_]\w*)").expect("static pattern"));
static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*class[ \t]+([A-Za-z_]\w*)").expect("static pattern"));
static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bfunction\b[ \t]*\*?[ \t]*([A-Za-z_$][\w$]*)[ \t]*\(").expect("static pattern")
});
static JS_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\bclass[ \t]+([A-Za-z_$][\w$]*)").expect("static pattern"));

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The directory to index does not exist.
    #[error("Directory not found")]
    NotFound(PathBuf),

    /// Reading or writing the settings document failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Builds and stores code indexes.
#[derive(Debug, Clone)]
pub struct CodeIndexer {
    root: PathBuf,
    versions_dir: PathBuf,
}

impl CodeIndexer {
    /// Creates an indexer reporting paths relative to `root`.
    pub fn new(root: &Path, versions_dir: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            versions_dir: versions_dir.to_path_buf(),
        }
    }

    /// Walks `dir` recursively in name order.
    pub fn build(&self, dir: &Path) -> Result<Vec<CodeIndexEntry>, IndexError> {
        if !dir.is_dir() {
            return Err(IndexError::NotFound(dir.to_path_buf()));
        }
        let mut entries = Vec::new();
        self.walk(dir, &mut entries)?;
        Ok(entries)
    }

    /// Rebuilds the index of `dir` and stores it in its settings.
    ///
    /// Returns the number of entries.
    pub fn index(&self, dir: &Path, settings: &SettingsStore) -> Result<usize, IndexError> {
        let entries = self.build(dir)?;
        let count = entries.len();
        let value = serde_json::to_value(&entries).map_err(|e| IndexError::Io(e.into()))?;
        settings.update(dir, |object| {
            object.insert(CODE_INDEX_KEY.to_string(), value);
        })?;
        info!(dir = ?dir, count, "Indexed code");
        Ok(count)
    }

    /// The index stored for `dir`, empty when there is none.
    pub fn stored(&self, dir: &Path, settings: &SettingsStore) -> Vec<CodeIndexEntry> {
        let Ok(Value::Object(mut object)) = settings.workspace(dir) else {
            return Vec::new();
        };
        object
            .remove(CODE_INDEX_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn walk(&self, dir: &Path, out: &mut Vec<CodeIndexEntry>) -> Result<(), IndexError> {
        let mut children: Vec<(PathBuf, fs::FileType)> = fs::read_dir(dir)?
            .flatten()
            .filter_map(|entry| Some((entry.path(), entry.file_type().ok()?)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, file_type) in children {
            if file_type.is_dir() {
                if path == self.versions_dir {
                    continue;
                }
                out.push(CodeIndexEntry::directory(relative_display(&self.root, &path)));
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                if let Some(entry) = self.index_file(&path) {
                    out.push(entry);
                }
            }
        }
        Ok(())
    }

    fn index_file(&self, path: &Path) -> Option<CodeIndexEntry> {
        let extension = path.extension()?.to_str()?;
        if !matches!(extension, "py" | "js" | "json") {
            return None;
        }

        let source = match fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!(path = ?path, error = %e, "Skipping unreadable file");
                String::new()
            }
        };
        let (functions, classes) = match extension {
            "py" => (captures(&PY_FUNCTION, &source), captures(&PY_CLASS, &source)),
            "js" => (captures(&JS_FUNCTION, &source), captures(&JS_CLASS, &source)),
            _ => (Vec::new(), Vec::new()),
        };

        Some(CodeIndexEntry {
            path: relative_display(&self.root, path),
            kind: extension.to_string(),
            functions: Some(functions),
            classes: Some(classes),
            snippet: Some(snippet(&source)),
        })
    }
}

fn captures(pattern: &Regex, source: &str) -> Vec<String> {
    pattern
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn snippet(source: &str) -> String {
    source.lines().take(SNIPPET_LINES).collect::<Vec<_>>().join("\n")
}

/// Short listing of `dir` for prompts: `[D] name/` and `[F] name` lines,
/// sorted, truncated with `...` after `max` entries.
pub fn directory_summary(dir: &Path, max: usize) -> String {
    let Ok(read) = fs::read_dir(dir) else {
        return String::new();
    };
    let mut paths: Vec<PathBuf> = read.flatten().map(|entry| entry.path()).collect();
    paths.sort();

    let mut lines = Vec::new();
    for path in paths {
        if lines.len() >= max {
            lines.push("...".to_string());
            break;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if path.is_file() {
            lines.push(format!("[F] {name}"));
        } else if path.is_dir() {
            lines.push(format!("[D] {name}/"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, CodeIndexer, SettingsStore) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let versions = root.join(".versions");
        fs::create_dir(&versions).unwrap();
        let indexer = CodeIndexer::new(&root, &versions);
        let settings = SettingsStore::new(&root, "settings.json");
        (dir, root, indexer, settings)
    }

    #[test]
    fn test_python_definitions() {
        let source = "import os\n\nclass Greeter:\n    def hello(self):\n        pass\n\nasync def main():\n    pass\n";
        assert_eq!(captures(&PY_FUNCTION, source), vec!["hello", "main"]);
        assert_eq!(captures(&PY_CLASS, source), vec!["Greeter"]);
    }

    #[test]
    fn test_javascript_definitions() {
        let source = "function add(a, b) { return a + b }\nclass Cart {}\nasync function* gen () {}\n";
        assert_eq!(captures(&JS_FUNCTION, source), vec!["add", "gen"]);
        assert_eq!(captures(&JS_CLASS, source), vec!["Cart"]);
    }

    #[test]
    fn test_snippet_keeps_first_lines() {
        let source: String = (0..30).map(|i| format!("line{i}\n")).collect();
        let snip = snippet(&source);
        assert_eq!(snip.lines().count(), SNIPPET_LINES);
        assert!(snip.ends_with("line19"));
    }

    #[test]
    fn test_build_walks_sorted_and_skips_others() {
        let (_dir, root, indexer, _settings) = setup();
        let proj = root.join("proj");
        fs::create_dir_all(proj.join("lib")).unwrap();
        fs::write(proj.join("main.py"), "def run():\n    pass\n").unwrap();
        fs::write(proj.join("lib/util.js"), "function helper() {}\n").unwrap();
        fs::write(proj.join("README.md"), "# readme").unwrap();
        fs::write(proj.join("package.json"), "{}").unwrap();

        let entries = indexer.build(&proj).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["proj/lib", "proj/lib/util.js", "proj/main.py", "proj/package.json"]
        );
        assert!(entries[0].is_directory());
        assert_eq!(entries[1].functions.as_deref(), Some(&["helper".to_string()][..]));
        assert_eq!(entries[2].kind, "py");
        assert_eq!(entries[3].functions.as_deref(), Some(&[][..]));
    }

    #[test]
    fn test_build_skips_versions_dir() {
        let (_dir, root, indexer, _settings) = setup();
        fs::write(root.join(".versions/old.py"), "def x(): pass").unwrap();

        let entries = indexer.build(&root).unwrap();
        assert!(entries.iter().all(|e| !e.path.starts_with(".versions")));
    }

    #[test]
    fn test_index_stores_into_settings() {
        let (_dir, root, indexer, settings) = setup();
        let proj = root.join("proj");
        fs::create_dir(&proj).unwrap();
        fs::write(proj.join("a.py"), "class A: pass\n").unwrap();
        settings
            .save_workspace(&proj, &serde_json::json!({ "theme": "dark" }))
            .unwrap();

        let count = indexer.index(&proj, &settings).unwrap();
        assert_eq!(count, 1);

        let stored = indexer.stored(&proj, &settings);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].classes.as_deref(), Some(&["A".to_string()][..]));
        assert_eq!(settings.workspace(&proj).unwrap()["theme"], "dark");
    }

    #[test]
    fn test_stored_is_empty_without_index() {
        let (_dir, root, indexer, settings) = setup();
        assert!(indexer.stored(&root, &settings).is_empty());
    }

    #[test]
    fn test_index_missing_dir() {
        let (_dir, root, indexer, settings) = setup();
        assert!(matches!(
            indexer.index(&root.join("absent"), &settings),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_summary_truncates() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
        }

        assert_eq!(
            directory_summary(dir.path(), 10),
            "[F] f0.txt\n[F] f1.txt\n[F] f2.txt\n[D] src/"
        );
        assert_eq!(directory_summary(dir.path(), 2), "[F] f0.txt\n[F] f1.txt\n...");
    }
}
