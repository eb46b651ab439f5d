//! Iteration cursors used by the loop instructions.
//!
//! A cursor captures the length of its source when the loop starts, so
//! elements appended by the loop body are never visited and elements removed
//! by it read as `undefined` instead of failing.

use super::record::ExecutionRecord;
use super::VmError;
use cogvm_core::values::{Handle, Value};

/// Maximum nesting of active loops.
pub const MAX_ITERATOR_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum CursorSource {
    /// Live array; elements are read through the handle on each step.
    Array(Handle),
    /// Object keys as they were when iteration started.
    Keys(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IteratorCursor {
    pub source: CursorSource,
    pub index: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IteratorStack {
    cursors: Vec<IteratorCursor>,
}

impl IteratorStack {
    pub fn from_cursors(cursors: Vec<IteratorCursor>) -> Self {
        IteratorStack { cursors }
    }

    pub fn cursors(&self) -> &[IteratorCursor] {
        &self.cursors
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn push(&mut self, cursor: IteratorCursor) -> Result<(), VmError> {
        if self.cursors.len() >= MAX_ITERATOR_DEPTH {
            return Err(VmError::Runtime(format!(
                "iterator nesting exceeds {} levels",
                MAX_ITERATOR_DEPTH
            )));
        }
        self.cursors.push(cursor);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<IteratorCursor, VmError> {
        self.cursors
            .pop()
            .ok_or_else(|| VmError::Runtime("no active iterator".into()))
    }

    fn top_mut(&mut self) -> Result<&mut IteratorCursor, VmError> {
        self.cursors
            .last_mut()
            .ok_or_else(|| VmError::Runtime("no active iterator".into()))
    }
}

/// `ITER_START`: pop an array and open a cursor over it.
pub(crate) fn iter_start(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let target = record.pop()?;
    let handle = match target {
        Value::ArrayRef(h) => h,
        other => {
            return Err(VmError::TypeError(format!(
                "cannot iterate over {}",
                other.kind_name()
            )))
        }
    };
    let length = record.heap.array(handle)?.len();
    record.iterators.push(IteratorCursor {
        source: CursorSource::Array(handle),
        index: 0,
        length,
    })
}

/// `OBJECT_ITER_START`: pop an object and open a cursor over its keys.
pub(crate) fn object_iter_start(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let target = record.pop()?;
    let handle = match target {
        Value::ObjectRef(h) => h,
        other => {
            return Err(VmError::TypeError(format!(
                "cannot iterate over the keys of {}",
                other.kind_name()
            )))
        }
    };
    let keys: Vec<String> = record.heap.object(handle)?.keys().cloned().collect();
    let length = keys.len();
    record.iterators.push(IteratorCursor {
        source: CursorSource::Keys(keys),
        index: 0,
        length,
    })
}

/// `ITER_NEXT`: push `(element, true)` or `(null, false)`.
pub(crate) fn iter_next(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let cursor = record.iterators.top_mut()?;
    let handle = match cursor.source {
        CursorSource::Array(h) => h,
        CursorSource::Keys(_) => {
            return Err(VmError::Runtime(
                "ITER_NEXT on an object key iterator".into(),
            ))
        }
    };
    if cursor.index >= cursor.length {
        record.push(Value::Null);
        record.push(Value::Boolean(false));
        return Ok(());
    }
    let index = cursor.index;
    cursor.index += 1;
    let element = record
        .heap
        .array(handle)?
        .get(index)
        .cloned()
        .unwrap_or(Value::Undefined);
    record.push(element);
    record.push(Value::Boolean(true));
    Ok(())
}

/// `OBJECT_ITER_NEXT`: push `(key, true)` or `(null, false)`.
pub(crate) fn object_iter_next(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let cursor = record.iterators.top_mut()?;
    let key = match &cursor.source {
        CursorSource::Keys(keys) if cursor.index < cursor.length => {
            keys.get(cursor.index).cloned()
        }
        CursorSource::Keys(_) => None,
        CursorSource::Array(_) => {
            return Err(VmError::Runtime(
                "OBJECT_ITER_NEXT on an array iterator".into(),
            ))
        }
    };
    match key {
        Some(key) => {
            cursor.index += 1;
            record.push(Value::String(key));
            record.push(Value::Boolean(true));
        }
        None => {
            record.push(Value::Null);
            record.push(Value::Boolean(false));
        }
    }
    Ok(())
}

/// `ITER_END`: close the innermost loop.
pub(crate) fn iter_end(record: &mut ExecutionRecord) -> Result<(), VmError> {
    record.iterators.pop().map(|_| ())
}
