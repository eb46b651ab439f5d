//! File accessor interface used by the `FS_*` opcodes.
//!
//! Implementations never raise: a denied or failed call degrades to an
//! empty listing, `None`, or `false`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Options accepted by [`FileAccessor::list_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub recursive: bool,
    /// Glob matched against file names, e.g. `"*.md"`.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Sandboxed file access. Implementations decide what is allowed.
pub trait FileAccessor: Send + Sync {
    fn list_files(&self, path: &str, options: &ListOptions) -> Vec<String>;
    fn read_file(&self, path: &str) -> Option<String>;
    fn write_file(&self, path: &str, content: &str) -> bool;
}

/// Accessor that denies every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFileAccess;

impl FileAccessor for NoFileAccess {
    fn list_files(&self, path: &str, _options: &ListOptions) -> Vec<String> {
        tracing::debug!(path, "file listing denied: no file access configured");
        Vec::new()
    }

    fn read_file(&self, path: &str) -> Option<String> {
        tracing::debug!(path, "file read denied: no file access configured");
        None
    }

    fn write_file(&self, path: &str, _content: &str) -> bool {
        tracing::debug!(path, "file write denied: no file access configured");
        false
    }
}

/// In-memory accessor for tests and embedding (returns configured files).
#[derive(Debug, Default)]
pub struct StubFiles {
    files: Mutex<BTreeMap<String, String>>,
}

impl StubFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files().get(path).cloned()
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileAccessor for StubFiles {
    fn list_files(&self, path: &str, options: &ListOptions) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files()
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .filter(|name| options.recursive || !name[prefix.len()..].contains('/'))
            .filter(|name| match &options.filter {
                Some(suffix) => name.ends_with(suffix.trim_start_matches('*')),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn read_file(&self, path: &str) -> Option<String> {
        self.contents(path)
    }

    fn write_file(&self, path: &str, content: &str) -> bool {
        self.files()
            .insert(path.to_string(), content.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_all_degrades_quietly() {
        let fs = NoFileAccess;
        assert!(fs.list_files("/", &ListOptions::default()).is_empty());
        assert_eq!(fs.read_file("/etc/passwd"), None);
        assert!(!fs.write_file("/tmp/x", "data"));
    }

    #[test]
    fn stub_lists_by_directory() {
        let fs = StubFiles::new()
            .with_file("docs/a.md", "A")
            .with_file("docs/b.txt", "B")
            .with_file("docs/deep/c.md", "C");

        assert_eq!(
            fs.list_files("docs", &ListOptions::default()),
            vec!["docs/a.md".to_string(), "docs/b.txt".to_string()]
        );
        let opts = ListOptions {
            recursive: true,
            filter: Some("*.md".into()),
        };
        assert_eq!(
            fs.list_files("docs/", &opts),
            vec!["docs/a.md".to_string(), "docs/deep/c.md".to_string()]
        );
        assert!(fs.write_file("docs/new.md", "N"));
        assert_eq!(fs.read_file("docs/new.md").as_deref(), Some("N"));
    }
}
