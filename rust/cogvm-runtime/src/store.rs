//! Durable record store.
//!
//! [`DurableStore`] abstracts the storage backend that holds program and
//! execution records as opaque bytes. [`MemoryStore`] keeps them in
//! process; [`FileStore`] writes one file per record, atomically via
//! write-to-tmp + rename, optionally gzip-compressed.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid record id: {0:?}")]
    InvalidId(String),
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// The two record collections the orchestrator persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Program,
    Execution,
}

impl RecordKind {
    fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Program => "programs",
            RecordKind::Execution => "executions",
        }
    }
}

/// Storage backend for program and execution records.
pub trait DurableStore: Send + Sync {
    /// Persist `data` under `id`, replacing any previous record.
    fn save(&self, kind: RecordKind, id: &str, data: &[u8]) -> Result<(), StoreError>;
    /// Load the record stored under `id`, if any.
    fn load(&self, kind: RecordKind, id: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Delete the record. Returns whether one existed.
    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError>;
    /// All stored ids of a kind, sorted.
    fn list(&self, kind: RecordKind) -> Result<Vec<String>, StoreError>;
}

/// Ids double as file names, so they are restricted to `[A-Za-z0-9_.-]`,
/// may not start with a dot, and are at most 128 bytes.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(RecordKind, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<(RecordKind, String), Vec<u8>>> {
        // Each operation is one map call, so a poisoned map is still consistent.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn save(&self, kind: RecordKind, id: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_id(id)?;
        self.records()
            .insert((kind, id.to_string()), data.to_vec());
        Ok(())
    }

    fn load(&self, kind: RecordKind, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_id(id)?;
        Ok(self.records().get(&(kind, id.to_string())).cloned())
    }

    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        Ok(self.records().remove(&(kind, id.to_string())).is_some())
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .records()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Stores records as `{dir}/{programs|executions}/{id}.json` (or
/// `.json.gz` when compressed).
///
/// Writes are atomic: data goes to a `.tmp` sibling first, then is renamed
/// into place so readers never see a partial record.
pub struct FileStore {
    dir: PathBuf,
    compressed: bool,
}

impl FileStore {
    /// Create (or open) a store rooted at `dir`, creating the collection
    /// directories if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        for kind in [RecordKind::Program, RecordKind::Execution] {
            fs::create_dir_all(dir.join(kind.dir_name()))?;
        }
        Ok(FileStore {
            dir,
            compressed: false,
        })
    }

    /// Create a store that gzip-compresses records on save.
    pub fn new_compressed(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self::new(dir)?;
        store.compressed = true;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn extension(&self) -> &'static str {
        if self.compressed {
            "json.gz"
        } else {
            "json"
        }
    }

    fn record_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.dir
            .join(kind.dir_name())
            .join(format!("{}.{}", id, self.extension()))
    }

    fn tmp_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.dir
            .join(kind.dir_name())
            .join(format!("{}.{}.tmp", id, self.extension()))
    }
}

impl DurableStore for FileStore {
    fn save(&self, kind: RecordKind, id: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_id(id)?;
        let bytes = if self.compressed {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        } else {
            data.to_vec()
        };
        let tmp = self.tmp_path(kind, id);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.record_path(kind, id))?;
        tracing::debug!(kind = ?kind, id, bytes = bytes.len(), "record saved");
        Ok(())
    }

    fn load(&self, kind: RecordKind, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_id(id)?;
        let path = self.record_path(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(path)?;
        if self.compressed {
            let mut out = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
            Ok(Some(out))
        } else {
            Ok(Some(raw))
        }
    }

    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        let path = self.record_path(kind, id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        let suffix = format!(".{}", self.extension());
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.dir.join(kind.dir_name()))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(suffix.as_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Create a throwaway temp dir that won't collide with other tests.
    fn temp_dir(suffix: &str) -> PathBuf {
        let mut p = env::temp_dir();
        p.push(format!("cogvm-store-test-{}-{}", suffix, std::process::id()));
        let _ = fs::remove_dir_all(&p);
        p
    }

    fn exercise(store: &dyn DurableStore) {
        assert_eq!(store.load(RecordKind::Execution, "run-1").unwrap(), None);

        store.save(RecordKind::Execution, "run-1", b"first").unwrap();
        store.save(RecordKind::Execution, "run-1", b"second").unwrap();
        store.save(RecordKind::Execution, "run-0", b"zero").unwrap();
        store.save(RecordKind::Program, "prog", b"code").unwrap();

        assert_eq!(
            store.load(RecordKind::Execution, "run-1").unwrap().as_deref(),
            Some(&b"second"[..])
        );
        assert_eq!(
            store.list(RecordKind::Execution).unwrap(),
            vec!["run-0".to_string(), "run-1".to_string()]
        );
        assert_eq!(store.list(RecordKind::Program).unwrap(), vec!["prog".to_string()]);

        assert!(store.delete(RecordKind::Execution, "run-1").unwrap());
        assert!(!store.delete(RecordKind::Execution, "run-1").unwrap());
        assert_eq!(store.load(RecordKind::Execution, "run-1").unwrap(), None);
    }

    #[test]
    fn memory_store_round_trip() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = temp_dir("plain");
        exercise(&FileStore::new(&dir).unwrap());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn compressed_file_store_round_trip() {
        let dir = temp_dir("gz");
        let store = FileStore::new_compressed(&dir).unwrap();
        assert!(store.is_compressed());
        exercise(&store);

        store.save(RecordKind::Program, "p", b"payload").unwrap();
        let on_disk = fs::read(dir.join("programs").join("p.json.gz")).unwrap();
        assert_ne!(on_disk, b"payload");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_leaves_no_tmp_files() {
        let dir = temp_dir("tmp");
        let store = FileStore::new(&dir).unwrap();
        store.save(RecordKind::Execution, "x", b"1").unwrap();
        let names: Vec<String> = fs::read_dir(dir.join("executions"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.json".to_string()]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ids_cannot_escape_the_store() {
        let store = MemoryStore::new();
        for bad in ["", "../etc", "a/b", ".hidden", "with space"] {
            assert!(
                matches!(
                    store.save(RecordKind::Program, bad, b""),
                    Err(StoreError::InvalidId(_))
                ),
                "{bad:?} accepted"
            );
        }
        assert!(validate_id("3f2a-run_1.v2").is_ok());
    }
}
