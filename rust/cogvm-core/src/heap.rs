//! Append-only heap for arrays and objects.
//!
//! Handles are indices into a monotonic arena: they are assigned at
//! allocation, never reused and never freed. There is no collector.

use crate::values::{format_number, Handle, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    Array,
    Object,
}

impl HeapKind {
    pub fn name(self) -> &'static str {
        match self {
            HeapKind::Array => "array",
            HeapKind::Object => "object",
        }
    }
}

/// Payload of one heap slot.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapEntry {
    Array(Vec<Value>),
    /// Keys are kept sorted so iteration and serialization are deterministic.
    Object(BTreeMap<String, Value>),
}

impl HeapEntry {
    pub fn kind(&self) -> HeapKind {
        match self {
            HeapEntry::Array(_) => HeapKind::Array,
            HeapEntry::Object(_) => HeapKind::Object,
        }
    }
}

/// Internal-consistency faults. A reference that does not resolve means the
/// bytecode or a persisted record broke the VM contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeapError {
    #[error("invalid heap handle {0}")]
    InvalidHandle(Handle),
    #[error("heap handle {handle} is not an {expected}")]
    KindMismatch { handle: Handle, expected: &'static str },
    #[error("heap is full")]
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    entries: Vec<HeapEntry>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a heap from entries whose handles are their positions.
    pub fn from_entries(entries: Vec<HeapEntry>) -> Self {
        Heap { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every slot in handle order.
    pub fn entries(&self) -> impl Iterator<Item = (Handle, &HeapEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (Handle(i as u32), e))
    }

    /// Fails once every `u32` handle has been handed out.
    pub fn allocate(&mut self, entry: HeapEntry) -> Result<Handle, HeapError> {
        let handle = next_handle(self.entries.len())?;
        self.entries.push(entry);
        Ok(handle)
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> Result<Value, HeapError> {
        Ok(Value::ArrayRef(self.allocate(HeapEntry::Array(items))?))
    }

    pub fn alloc_object(&mut self, fields: BTreeMap<String, Value>) -> Result<Value, HeapError> {
        Ok(Value::ObjectRef(self.allocate(HeapEntry::Object(fields))?))
    }

    pub fn get(&self, handle: Handle) -> Result<&HeapEntry, HeapError> {
        self.entries
            .get(handle.index())
            .ok_or(HeapError::InvalidHandle(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HeapEntry, HeapError> {
        self.entries
            .get_mut(handle.index())
            .ok_or(HeapError::InvalidHandle(handle))
    }

    pub fn array(&self, handle: Handle) -> Result<&Vec<Value>, HeapError> {
        match self.get(handle)? {
            HeapEntry::Array(items) => Ok(items),
            HeapEntry::Object(_) => Err(mismatch(handle, HeapKind::Array)),
        }
    }

    pub fn array_mut(&mut self, handle: Handle) -> Result<&mut Vec<Value>, HeapError> {
        match self.get_mut(handle)? {
            HeapEntry::Array(items) => Ok(items),
            HeapEntry::Object(_) => Err(mismatch(handle, HeapKind::Array)),
        }
    }

    pub fn object(&self, handle: Handle) -> Result<&BTreeMap<String, Value>, HeapError> {
        match self.get(handle)? {
            HeapEntry::Object(fields) => Ok(fields),
            HeapEntry::Array(_) => Err(mismatch(handle, HeapKind::Object)),
        }
    }

    pub fn object_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut BTreeMap<String, Value>, HeapError> {
        match self.get_mut(handle)? {
            HeapEntry::Object(fields) => Ok(fields),
            HeapEntry::Array(_) => Err(mismatch(handle, HeapKind::Object)),
        }
    }

    /// Copy the graph reachable from `value` under fresh handles.
    ///
    /// Shared substructure and cycles are reproduced in the copy; nothing in
    /// the copy aliases the original.
    pub fn deep_copy(&mut self, value: &Value) -> Result<Value, HeapError> {
        let mut remap: HashMap<Handle, Handle> = HashMap::new();
        let mut pending: Vec<(Handle, Handle)> = Vec::new();
        let root = self.copy_ref(value, &mut remap, &mut pending)?;

        while let Some((from, to)) = pending.pop() {
            let copied = match self.get(from)?.clone() {
                HeapEntry::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in &items {
                        out.push(self.copy_ref(item, &mut remap, &mut pending)?);
                    }
                    HeapEntry::Array(out)
                }
                HeapEntry::Object(fields) => {
                    let mut out = BTreeMap::new();
                    for (key, item) in &fields {
                        out.insert(key.clone(), self.copy_ref(item, &mut remap, &mut pending)?);
                    }
                    HeapEntry::Object(out)
                }
            };
            *self.get_mut(to)? = copied;
        }
        Ok(root)
    }

    fn copy_ref(
        &mut self,
        value: &Value,
        remap: &mut HashMap<Handle, Handle>,
        pending: &mut Vec<(Handle, Handle)>,
    ) -> Result<Value, HeapError> {
        let (handle, is_array) = match value {
            Value::ArrayRef(h) => (*h, true),
            Value::ObjectRef(h) => (*h, false),
            other => return Ok(other.clone()),
        };
        let fresh = match remap.get(&handle) {
            Some(fresh) => *fresh,
            None => {
                let placeholder = match self.get(handle)? {
                    HeapEntry::Array(_) => HeapEntry::Array(Vec::new()),
                    HeapEntry::Object(_) => HeapEntry::Object(BTreeMap::new()),
                };
                let fresh = self.allocate(placeholder)?;
                remap.insert(handle, fresh);
                pending.push((handle, fresh));
                fresh
            }
        };
        Ok(if is_array {
            Value::ArrayRef(fresh)
        } else {
            Value::ObjectRef(fresh)
        })
    }

    /// String conversion used by concatenation and `TO_STRING`: arrays join
    /// their elements with commas (null and undefined print empty), objects
    /// print as `[object Object]`, and a cycle prints empty.
    pub fn display(&self, value: &Value) -> Result<String, HeapError> {
        let mut visiting = HashSet::new();
        self.display_inner(value, &mut visiting)
    }

    fn display_inner(
        &self,
        value: &Value,
        visiting: &mut HashSet<Handle>,
    ) -> Result<String, HeapError> {
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::ObjectRef(h) => {
                self.object(*h)?;
                "[object Object]".to_string()
            }
            Value::ArrayRef(h) => {
                if !visiting.insert(*h) {
                    return Ok(String::new());
                }
                let items = self.array(*h)?;
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    if item.is_nullish() {
                        parts.push(String::new());
                    } else {
                        parts.push(self.display_inner(item, visiting)?);
                    }
                }
                visiting.remove(h);
                parts.join(",")
            }
        })
    }
}

fn mismatch(handle: Handle, expected: HeapKind) -> HeapError {
    HeapError::KindMismatch {
        handle,
        expected: expected.name(),
    }
}

fn next_handle(len: usize) -> Result<Handle, HeapError> {
    u32::try_from(len)
        .map(Handle)
        .map_err(|_| HeapError::Exhausted)
}
