//! Serialized form of an execution record.
//!
//! An [`ExecutionSnapshot`] is a fully-owned, storage-safe mirror of an
//! [`ExecutionRecord`]. Handles are written as they are, never renumbered,
//! so aliasing between the stack, variables, heap and iterator cursors
//! survives a round trip. The format is versioned; a document with any other
//! version is rejected before the rest of it is decoded.

use crate::vm::{
    CursorSource, ExecutionError, ExecutionRecord, ExecutionStatus, IteratorCursor, IteratorStack,
};
use cogvm_core::heap::{Heap, HeapEntry, HeapKind};
use cogvm_core::isa::Program;
use cogvm_core::values::{Handle, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Stored values
// ---------------------------------------------------------------------------

/// Owned mirror of [`Value`]. JSON cannot carry NaN or the infinities, so
/// those travel as `NonFinite("NaN" | "Infinity" | "-Infinity")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    String(String),
    Number(f64),
    NonFinite(String),
    Boolean(bool),
    Null,
    Undefined,
    ArrayRef(u32),
    ObjectRef(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVariable {
    pub name: String,
    pub value: StoredValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredHeapEntry {
    Array {
        handle: u32,
        items: Vec<StoredValue>,
    },
    Object {
        handle: u32,
        fields: BTreeMap<String, StoredValue>,
    },
}

impl StoredHeapEntry {
    fn handle(&self) -> u32 {
        match self {
            StoredHeapEntry::Array { handle, .. } | StoredHeapEntry::Object { handle, .. } => {
                *handle
            }
        }
    }

    fn kind(&self) -> HeapKind {
        match self {
            StoredHeapEntry::Array { .. } => HeapKind::Array,
            StoredHeapEntry::Object { .. } => HeapKind::Object,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum StoredCursor {
    Array {
        handle: u32,
        index: usize,
        length: usize,
    },
    Keys {
        keys: Vec<String>,
        index: usize,
        length: usize,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    #[error("version mismatch: snapshot v{found}, runtime v{expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("heap entry at position {position} carries handle {handle}")]
    HandleOrder { position: usize, handle: u32 },
    #[error("reference to missing heap handle {0}")]
    DanglingReference(u32),
    #[error("handle {handle} is referenced as an {expected} but stores an {found}")]
    KindMismatch {
        handle: u32,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid non-finite number {0:?}")]
    InvalidNumber(String),
    #[error("pc {pc} is out of bounds for a {status} execution of {len} instructions")]
    PcOutOfBounds {
        pc: usize,
        len: usize,
        status: ExecutionStatus,
    },
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub version: u32,
    pub pc: usize,
    pub status: ExecutionStatus,
    pub stack: Vec<StoredValue>,
    pub variables: Vec<StoredVariable>,
    pub heap: Vec<StoredHeapEntry>,
    pub iterators: Vec<StoredCursor>,
    #[serde(default)]
    pub pending_prompt: Option<String>,
    pub output: Vec<String>,
    #[serde(default)]
    pub return_value: Option<StoredValue>,
    #[serde(default)]
    pub last_error: Option<ExecutionError>,
    pub steps: u64,
}

impl ExecutionSnapshot {
    pub fn capture(record: &ExecutionRecord) -> Self {
        let heap = record
            .heap
            .entries()
            .map(|(handle, entry)| match entry {
                HeapEntry::Array(items) => StoredHeapEntry::Array {
                    handle: handle.0,
                    items: items.iter().map(store).collect(),
                },
                HeapEntry::Object(fields) => StoredHeapEntry::Object {
                    handle: handle.0,
                    fields: fields.iter().map(|(k, v)| (k.clone(), store(v))).collect(),
                },
            })
            .collect();
        let iterators = record
            .iterators
            .cursors()
            .iter()
            .map(|c| match &c.source {
                CursorSource::Array(h) => StoredCursor::Array {
                    handle: h.0,
                    index: c.index,
                    length: c.length,
                },
                CursorSource::Keys(keys) => StoredCursor::Keys {
                    keys: keys.clone(),
                    index: c.index,
                    length: c.length,
                },
            })
            .collect();

        ExecutionSnapshot {
            version: SNAPSHOT_VERSION,
            pc: record.pc,
            status: record.status,
            stack: record.stack.iter().map(store).collect(),
            variables: record
                .variables
                .iter()
                .map(|(name, value)| StoredVariable {
                    name: name.clone(),
                    value: store(value),
                })
                .collect(),
            heap,
            iterators,
            pending_prompt: record.pending_prompt.clone(),
            output: record.output.clone(),
            return_value: record.return_value.as_ref().map(store),
            last_error: record.last_error.clone(),
            steps: record.steps,
        }
    }

    /// Rebuild the record, checking that heap handles are exactly `0..n` in
    /// order and that every reference resolves to an entry of the right
    /// kind.
    pub fn restore(&self) -> Result<ExecutionRecord, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }

        let mut kinds = Vec::with_capacity(self.heap.len());
        for (position, entry) in self.heap.iter().enumerate() {
            if entry.handle() as usize != position {
                return Err(SnapshotError::HandleOrder {
                    position,
                    handle: entry.handle(),
                });
            }
            kinds.push(entry.kind());
        }

        let mut entries = Vec::with_capacity(self.heap.len());
        for entry in &self.heap {
            entries.push(match entry {
                StoredHeapEntry::Array { items, .. } => HeapEntry::Array(
                    items
                        .iter()
                        .map(|v| load(v, &kinds))
                        .collect::<Result<_, _>>()?,
                ),
                StoredHeapEntry::Object { fields, .. } => {
                    let mut out = BTreeMap::new();
                    for (k, v) in fields {
                        out.insert(k.clone(), load(v, &kinds)?);
                    }
                    HeapEntry::Object(out)
                }
            });
        }

        let mut variables = BTreeMap::new();
        for var in &self.variables {
            variables.insert(var.name.clone(), load(&var.value, &kinds)?);
        }

        let mut cursors = Vec::with_capacity(self.iterators.len());
        for cursor in &self.iterators {
            cursors.push(match cursor {
                StoredCursor::Array {
                    handle,
                    index,
                    length,
                } => {
                    expect_kind(*handle, HeapKind::Array, &kinds)?;
                    IteratorCursor {
                        source: CursorSource::Array(Handle(*handle)),
                        index: *index,
                        length: *length,
                    }
                }
                StoredCursor::Keys {
                    keys,
                    index,
                    length,
                } => IteratorCursor {
                    source: CursorSource::Keys(keys.clone()),
                    index: *index,
                    length: *length,
                },
            });
        }

        Ok(ExecutionRecord {
            pc: self.pc,
            stack: self
                .stack
                .iter()
                .map(|v| load(v, &kinds))
                .collect::<Result<_, _>>()?,
            variables,
            heap: Heap::from_entries(entries),
            iterators: IteratorStack::from_cursors(cursors),
            status: self.status,
            pending_prompt: self.pending_prompt.clone(),
            output: self.output.clone(),
            return_value: self
                .return_value
                .as_ref()
                .map(|v| load(v, &kinds))
                .transpose()?,
            last_error: self.last_error.clone(),
            steps: self.steps,
        })
    }

    /// [`restore`](Self::restore), additionally checking that a
    /// non-terminal record's `pc` addresses `program`.
    pub fn restore_for(&self, program: &Program) -> Result<ExecutionRecord, SnapshotError> {
        let record = self.restore()?;
        let len = program.len();
        let in_bounds = match record.status {
            ExecutionStatus::AwaitingInput => record.pc < len,
            ExecutionStatus::Ready | ExecutionStatus::Running => record.pc <= len,
            ExecutionStatus::Completed | ExecutionStatus::Failed => true,
        };
        if !in_bounds {
            return Err(SnapshotError::PcOutOfBounds {
                pc: record.pc,
                len,
                status: record.status,
            });
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::Serialize(e.to_string()))
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value, SnapshotError> {
        serde_json::to_value(self).map_err(|e| SnapshotError::Serialize(e.to_string()))
    }

    /// Decode a snapshot, checking the version tag before anything else.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        let header: VersionHeader =
            serde_json::from_str(text).map_err(|e| SnapshotError::Deserialize(e.to_string()))?;
        if header.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: header.version,
            });
        }
        serde_json::from_str(text).map_err(|e| SnapshotError::Deserialize(e.to_string()))
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, SnapshotError> {
        let text = value.to_string();
        Self::from_json(&text)
    }
}

fn store(value: &Value) -> StoredValue {
    match value {
        Value::String(s) => StoredValue::String(s.clone()),
        Value::Number(n) if n.is_nan() => StoredValue::NonFinite("NaN".into()),
        Value::Number(n) if n.is_infinite() => StoredValue::NonFinite(
            if *n > 0.0 { "Infinity" } else { "-Infinity" }.into(),
        ),
        Value::Number(n) => StoredValue::Number(*n),
        Value::Boolean(b) => StoredValue::Boolean(*b),
        Value::Null => StoredValue::Null,
        Value::Undefined => StoredValue::Undefined,
        Value::ArrayRef(h) => StoredValue::ArrayRef(h.0),
        Value::ObjectRef(h) => StoredValue::ObjectRef(h.0),
    }
}

fn expect_kind(handle: u32, expected: HeapKind, kinds: &[HeapKind]) -> Result<(), SnapshotError> {
    match kinds.get(handle as usize) {
        None => Err(SnapshotError::DanglingReference(handle)),
        Some(found) if *found != expected => Err(SnapshotError::KindMismatch {
            handle,
            expected: expected.name(),
            found: found.name(),
        }),
        Some(_) => Ok(()),
    }
}

fn load(value: &StoredValue, kinds: &[HeapKind]) -> Result<Value, SnapshotError> {
    Ok(match value {
        StoredValue::String(s) => Value::String(s.clone()),
        StoredValue::Number(n) => Value::Number(*n),
        StoredValue::NonFinite(s) => Value::Number(match s.as_str() {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => return Err(SnapshotError::InvalidNumber(s.clone())),
        }),
        StoredValue::Boolean(b) => Value::Boolean(*b),
        StoredValue::Null => Value::Null,
        StoredValue::Undefined => Value::Undefined,
        StoredValue::ArrayRef(h) => {
            expect_kind(*h, HeapKind::Array, kinds)?;
            Value::ArrayRef(Handle(*h))
        }
        StoredValue::ObjectRef(h) => {
            expect_kind(*h, HeapKind::Object, kinds)?;
            Value::ObjectRef(Handle(*h))
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
