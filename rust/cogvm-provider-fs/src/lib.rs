//! Sandboxed filesystem accessor for the `FS_*` opcodes.
//!
//! [`SandboxedFs`] confines every call to a set of allow-listed root
//! directories:
//! - `list_files`: sorted file paths under a directory, optionally
//!   recursive and filtered by a glob on the file name
//! - `read_file`: file contents as UTF-8, or `None`
//! - `write_file`: only when writes are enabled; the parent directory must
//!   already exist inside a root
//!
//! Paths are canonicalised before the allow-list check, so `..` segments
//! and symlinks cannot step outside a root. Relative paths resolve against
//! the first root. Nothing here raises: a denied or failed call degrades to
//! an empty listing, `None` or `false`.

use cogvm_runtime::sandbox::{FileAccessor, ListOptions};
use std::fs;
use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// Access kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    List,
    Read,
    Write,
}

impl Access {
    fn verb(self) -> &'static str {
        match self {
            Access::List => "list",
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxedFs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SandboxedFs {
    roots: Vec<PathBuf>,
    allow_write: bool,
}

impl SandboxedFs {
    /// Build a sandbox over `roots`. Roots that do not exist are dropped
    /// with a warning; with no usable root every call is denied.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .filter_map(|root| {
                let root = root.as_ref();
                match root.canonicalize() {
                    Ok(canonical) => Some(canonical),
                    Err(e) => {
                        tracing::warn!(root = %root.display(), error = %e, "ignoring sandbox root");
                        None
                    }
                }
            })
            .collect();
        SandboxedFs {
            roots,
            allow_write: false,
        }
    }

    pub fn with_writes(mut self, allow_write: bool) -> Self {
        self.allow_write = allow_write;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn allows_writes(&self) -> bool {
        self.allow_write
    }

    fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }

    /// Absolute form of a requested path, before canonicalisation.
    fn absolute(&self, path: &str) -> Option<PathBuf> {
        let path = Path::new(path);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            self.roots.first().map(|root| root.join(path))
        }
    }

    /// Canonical path of an existing file or directory inside a root.
    fn existing(&self, path: &str, access: Access) -> Option<PathBuf> {
        let canonical = self.absolute(path)?.canonicalize().ok()?;
        if self.contains(&canonical) {
            Some(canonical)
        } else {
            deny(path, access);
            None
        }
    }

    /// Target of a write: the canonical parent joined with the file name.
    fn writable(&self, path: &str) -> Option<PathBuf> {
        if !self.allow_write {
            deny(path, Access::Write);
            return None;
        }
        let absolute = self.absolute(path)?;
        let name = match absolute.components().next_back() {
            Some(Component::Normal(name)) => name.to_os_string(),
            _ => return None,
        };
        let parent = absolute.parent()?.canonicalize().ok()?;
        let target = parent.join(name);
        // An existing symlink at the target would redirect the write.
        let resolved = target.canonicalize().unwrap_or_else(|_| target.clone());
        if self.contains(&parent) && self.contains(&resolved) {
            Some(target)
        } else {
            deny(path, Access::Write);
            None
        }
    }

    fn walk(
        &self,
        dir: &Path,
        prefix: &Path,
        options: &ListOptions,
        pattern: Option<&glob::Pattern>,
        out: &mut Vec<String>,
    ) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "cannot read directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let path = entry.path();
            let Ok(canonical) = path.canonicalize() else {
                continue;
            };
            if !self.contains(&canonical) {
                tracing::debug!(path = %path.display(), "skipping entry outside the sandbox");
                continue;
            }
            let shown = prefix.join(&name);
            let is_link = entry.file_type().is_ok_and(|t| t.is_symlink());
            if canonical.is_dir() {
                // Never descend through a directory symlink.
                if options.recursive && !is_link {
                    self.walk(&canonical, &shown, options, pattern, out);
                }
            } else if pattern.map_or(true, |p| p.matches(&name.to_string_lossy())) {
                out.push(shown.to_string_lossy().into_owned());
            }
        }
    }
}

fn deny(path: &str, access: Access) {
    tracing::warn!(path, access = access.verb(), "file access denied by sandbox");
}

// ---------------------------------------------------------------------------
// FileAccessor implementation
// ---------------------------------------------------------------------------

impl FileAccessor for SandboxedFs {
    fn list_files(&self, path: &str, options: &ListOptions) -> Vec<String> {
        let Some(dir) = self.existing(path, Access::List) else {
            return Vec::new();
        };
        if !dir.is_dir() {
            return Vec::new();
        }
        let pattern = match options.filter.as_deref().map(glob::Pattern::new) {
            None => None,
            Some(Ok(pattern)) => Some(pattern),
            Some(Err(e)) => {
                tracing::warn!(path, error = %e, "invalid listing filter");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        self.walk(&dir, Path::new(path), options, pattern.as_ref(), &mut out);
        out.sort();
        out
    }

    fn read_file(&self, path: &str) -> Option<String> {
        let file = self.existing(path, Access::Read)?;
        match fs::read_to_string(&file) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::debug!(path, error = %e, "read failed");
                None
            }
        }
    }

    fn write_file(&self, path: &str, content: &str) -> bool {
        let Some(target) = self.writable(path) else {
            return false;
        };
        match fs::write(&target, content) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(path, error = %e, "write failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
