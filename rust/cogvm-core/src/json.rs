//! Conversion between heap values and `serde_json` values.
//!
//! Used by `JSON_PARSE` / `JSON_STRINGIFY`, by `PRINT`, and to bring
//! externally supplied answers into an execution's heap.

use crate::heap::{Heap, HeapError};
use crate::values::{Handle, Value};
use serde_json::{Map, Number, Value as Json};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JsonError {
    #[error("converting circular structure to JSON")]
    Cyclic,
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Largest integer a double holds exactly; integral numbers up to this
/// magnitude are written without a fractional part.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert `value` to JSON. `Ok(None)` means the value has no JSON form
/// (undefined); inside arrays undefined becomes `null`, inside objects the
/// key is dropped. Non-finite numbers become `null`.
pub fn to_json(heap: &Heap, value: &Value) -> Result<Option<Json>, JsonError> {
    let mut visiting = HashSet::new();
    to_json_inner(heap, value, &mut visiting)
}

fn to_json_inner(
    heap: &Heap,
    value: &Value,
    visiting: &mut HashSet<Handle>,
) -> Result<Option<Json>, JsonError> {
    Ok(Some(match value {
        Value::Undefined => return Ok(None),
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::String(s) => Json::String(s.clone()),
        Value::Number(n) => number_to_json(*n),
        Value::ArrayRef(h) => {
            if !visiting.insert(*h) {
                return Err(JsonError::Cyclic);
            }
            let mut out = Vec::new();
            for item in heap.array(*h)? {
                out.push(to_json_inner(heap, item, visiting)?.unwrap_or(Json::Null));
            }
            visiting.remove(h);
            Json::Array(out)
        }
        Value::ObjectRef(h) => {
            if !visiting.insert(*h) {
                return Err(JsonError::Cyclic);
            }
            let mut out = Map::new();
            for (key, item) in heap.object(*h)? {
                if let Some(j) = to_json_inner(heap, item, visiting)? {
                    out.insert(key.clone(), j);
                }
            }
            visiting.remove(h);
            Json::Object(out)
        }
    }))
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Json::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

/// Allocate `json` into `heap`. Arrays and objects get fresh handles.
pub fn from_json(heap: &mut Heap, json: &Json) -> Result<Value, HeapError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            let values = items
                .iter()
                .map(|item| from_json(heap, item))
                .collect::<Result<_, _>>()?;
            heap.alloc_array(values)?
        }
        Json::Object(fields) => {
            let mut map = BTreeMap::new();
            for (key, item) in fields {
                let v = from_json(heap, item)?;
                map.insert(key.clone(), v);
            }
            heap.alloc_object(map)?
        }
    })
}
