//! Array and object instructions.
//!
//! Every mutation happens in place on the heap entry and the same handle is
//! pushed back, so other holders of the handle observe the change.

use super::record::ExecutionRecord;
use super::VmError;
use cogvm_core::heap::Heap;
use cogvm_core::values::{Handle, Value};
use std::collections::BTreeMap;

/// Largest number of `undefined` slots a single store may add to an array.
pub const MAX_ARRAY_GAP: usize = 1_000_000;

/// A numeric array index. Only non-negative integral numbers qualify.
fn array_index(index: &Value, op: &str) -> Result<usize, VmError> {
    let n = match index {
        Value::Number(n) => *n,
        other => {
            return Err(VmError::type_error(format!(
                "{} expects a numeric index, got {}",
                op,
                other.kind_name()
            )))
        }
    };
    if n < 0.0 {
        return Err(VmError::runtime(format!("negative array index {}", n)));
    }
    if n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(VmError::runtime(format!("invalid array index {}", n)));
    }
    Ok(n as usize)
}

/// An object key. Objects are indexed by strings only.
fn object_key(index: Value, op: &str) -> Result<String, VmError> {
    match index {
        Value::String(s) => Ok(s),
        other => Err(VmError::type_error(format!(
            "{} expects a string key on an object, got {}",
            op,
            other.kind_name()
        ))),
    }
}

fn set_index(items: &mut Vec<Value>, index: usize, value: Value) -> Result<(), VmError> {
    if index < items.len() {
        items[index] = value;
        return Ok(());
    }
    let gap = index - items.len();
    if gap > MAX_ARRAY_GAP {
        return Err(VmError::runtime(format!(
            "array index {} is too far past the end ({} elements)",
            index,
            items.len()
        )));
    }
    items.resize(index, Value::Undefined);
    items.push(value);
    Ok(())
}

fn set_length(items: &mut Vec<Value>, length: &Value) -> Result<(), VmError> {
    let new_len = array_index(length, "length")?;
    if new_len > items.len() && new_len - items.len() > MAX_ARRAY_GAP {
        return Err(VmError::runtime(format!(
            "array length {} grows the array too far",
            new_len
        )));
    }
    items.resize(new_len, Value::Undefined);
    Ok(())
}

/// Property lookup shared by `PROPERTY_GET`, `ARRAY_MAP_PROP` and
/// `ARRAY_FILTER_PROP`. `None` for nullish targets.
fn lookup(heap: &Heap, target: &Value, key: &str) -> Result<Option<Value>, VmError> {
    Ok(Some(match target {
        Value::Null | Value::Undefined => return Ok(None),
        Value::ObjectRef(h) => heap.object(*h)?.get(key).cloned().unwrap_or(Value::Undefined),
        Value::ArrayRef(h) => {
            let items = heap.array(*h)?;
            if key == "length" {
                Value::Number(items.len() as f64)
            } else {
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined)
            }
        }
        Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
        _ => Value::Undefined,
    }))
}

fn expect_array(value: &Value, op: &str) -> Result<Handle, VmError> {
    match value {
        Value::ArrayRef(h) => Ok(*h),
        other => Err(VmError::type_error(format!(
            "{} expects an array, got {}",
            op,
            other.kind_name()
        ))),
    }
}

pub(crate) fn array_push(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (target, value) = record.pop_pair()?;
    let h = expect_array(&target, "ARRAY_PUSH")?;
    record.heap.array_mut(h)?.push(value);
    record.push(target);
    Ok(())
}

pub(crate) fn array_get(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (target, index) = record.pop_pair()?;
    let result = match &target {
        Value::ArrayRef(h) => {
            let i = array_index(&index, "ARRAY_GET")?;
            record
                .heap
                .array(*h)?
                .get(i)
                .cloned()
                .unwrap_or(Value::Undefined)
        }
        Value::ObjectRef(h) => {
            let key = object_key(index, "ARRAY_GET")?;
            record
                .heap
                .object(*h)?
                .get(&key)
                .cloned()
                .unwrap_or(Value::Undefined)
        }
        Value::String(s) => {
            let i = array_index(&index, "ARRAY_GET")?;
            s.chars()
                .nth(i)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Undefined)
        }
        other => {
            return Err(VmError::type_error(format!(
                "cannot index into {}",
                other.kind_name()
            )))
        }
    };
    record.push(result);
    Ok(())
}

pub(crate) fn array_set(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let value = record.pop()?;
    let (target, index) = record.pop_pair()?;
    match &target {
        Value::ArrayRef(h) => {
            let i = array_index(&index, "ARRAY_SET")?;
            set_index(record.heap.array_mut(*h)?, i, value)?;
        }
        Value::ObjectRef(h) => {
            let key = object_key(index, "ARRAY_SET")?;
            record.heap.object_mut(*h)?.insert(key, value);
        }
        other => {
            return Err(VmError::type_error(format!(
                "cannot assign an index on {}",
                other.kind_name()
            )))
        }
    }
    record.push(target);
    Ok(())
}

pub(crate) fn array_len(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let target = record.pop()?;
    let len = match &target {
        Value::ArrayRef(h) => record.heap.array(*h)?.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(VmError::type_error(format!(
                "ARRAY_LEN expects an array, got {}",
                other.kind_name()
            )))
        }
    };
    record.push(Value::Number(len as f64));
    Ok(())
}

pub(crate) fn array_map_prop(record: &mut ExecutionRecord, key: &str) -> Result<(), VmError> {
    let target = record.pop()?;
    let h = expect_array(&target, "ARRAY_MAP_PROP")?;
    let mut out = Vec::new();
    for item in record.heap.array(h)? {
        out.push(lookup(&record.heap, item, key)?.unwrap_or(Value::Undefined));
    }
    let result = record.heap.alloc_array(out)?;
    record.push(result);
    Ok(())
}

pub(crate) fn array_filter_prop(record: &mut ExecutionRecord, key: &str) -> Result<(), VmError> {
    let target = record.pop()?;
    let h = expect_array(&target, "ARRAY_FILTER_PROP")?;
    let mut out = Vec::new();
    for item in record.heap.array(h)? {
        if lookup(&record.heap, item, key)?.is_some_and(|v| v.is_truthy()) {
            out.push(item.clone());
        }
    }
    let result = record.heap.alloc_array(out)?;
    record.push(result);
    Ok(())
}

pub(crate) fn object_keys(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let target = record.pop()?;
    let keys: Vec<Value> = match &target {
        Value::ObjectRef(h) => record
            .heap
            .object(*h)?
            .keys()
            .map(|k| Value::String(k.clone()))
            .collect(),
        Value::ArrayRef(h) => (0..record.heap.array(*h)?.len())
            .map(|i| Value::String(i.to_string()))
            .collect(),
        other => {
            return Err(VmError::type_error(format!(
                "OBJECT_KEYS expects an object, got {}",
                other.kind_name()
            )))
        }
    };
    let result = record.heap.alloc_array(keys)?;
    record.push(result);
    Ok(())
}

pub(crate) fn property_get(record: &mut ExecutionRecord, key: &str) -> Result<(), VmError> {
    let target = record.pop()?;
    let value = lookup(&record.heap, &target, key)?.ok_or_else(|| {
        VmError::type_error(format!(
            "cannot read property '{}' of {}",
            key,
            target.kind_name()
        ))
    })?;
    record.push(value);
    Ok(())
}

pub(crate) fn property_set(record: &mut ExecutionRecord, key: &str) -> Result<(), VmError> {
    let (target, value) = record.pop_pair()?;
    match &target {
        Value::ObjectRef(h) => {
            record.heap.object_mut(*h)?.insert(key.to_string(), value);
        }
        Value::ArrayRef(h) => {
            let items = record.heap.array_mut(*h)?;
            if key == "length" {
                set_length(items, &value)?;
            } else if let Ok(i) = key.parse::<usize>() {
                set_index(items, i, value)?;
            } else {
                return Err(VmError::type_error(format!(
                    "cannot set property '{}' on an array",
                    key
                )));
            }
        }
        other => {
            return Err(VmError::type_error(format!(
                "cannot set property '{}' on {}",
                key,
                other.kind_name()
            )))
        }
    }
    record.push(target);
    Ok(())
}

pub(crate) fn new_array(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let value = record.heap.alloc_array(Vec::new())?;
    record.push(value);
    Ok(())
}

pub(crate) fn new_object(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let value = record.heap.alloc_object(BTreeMap::new())?;
    record.push(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(values: Vec<Value>) -> ExecutionRecord {
        let mut record = ExecutionRecord::new();
        for v in values {
            record.push(v);
        }
        record
    }

    #[test]
    fn push_mutates_in_place() {
        let mut record = ExecutionRecord::new();
        new_array(&mut record).unwrap();
        let arr = record.peek(0).unwrap().clone();
        record.push(Value::Number(7.0));
        array_push(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), arr);
        assert_eq!(
            record.heap.array(arr.handle().unwrap()).unwrap(),
            &vec![Value::Number(7.0)]
        );
    }

    #[test]
    fn set_past_the_end_pads() {
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::Number(1.0)]).unwrap();
        record.push(arr.clone());
        record.push(Value::Number(3.0));
        record.push(Value::string("x"));
        array_set(&mut record).unwrap();
        assert_eq!(
            record.heap.array(arr.handle().unwrap()).unwrap(),
            &vec![
                Value::Number(1.0),
                Value::Undefined,
                Value::Undefined,
                Value::string("x")
            ]
        );
    }

    #[test]
    fn huge_gaps_are_refused() {
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![]).unwrap();
        record.push(arr);
        record.push(Value::Number(1e9));
        record.push(Value::Null);
        assert!(matches!(array_set(&mut record), Err(VmError::Runtime(_))));
    }

    #[test]
    fn get_dispatches_on_target_kind() {
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::string("a")]).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("1".to_string(), Value::Boolean(true));
        let obj = record.heap.alloc_object(fields).unwrap();

        record.push(arr.clone());
        record.push(Value::Number(0.0));
        array_get(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), Value::string("a"));

        record.push(arr);
        record.push(Value::Number(5.0));
        array_get(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), Value::Undefined);

        record.push(obj);
        record.push(Value::string("1"));
        array_get(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), Value::Boolean(true));

        record.push(Value::Null);
        record.push(Value::Number(0.0));
        assert!(matches!(array_get(&mut record), Err(VmError::TypeError(_))));
    }

    #[test]
    fn length_property() {
        let mut record = ExecutionRecord::new();
        let arr = record
            .heap
            .alloc_array(vec![Value::Null, Value::Null, Value::Null]).unwrap();
        record.push(arr.clone());
        property_get(&mut record, "length").unwrap();
        assert_eq!(record.pop().unwrap(), Value::Number(3.0));

        record.push(Value::string("héllo"));
        property_get(&mut record, "length").unwrap();
        assert_eq!(record.pop().unwrap(), Value::Number(5.0));

        record.push(arr.clone());
        record.push(Value::Number(1.0));
        property_set(&mut record, "length").unwrap();
        assert_eq!(record.heap.array(arr.handle().unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn property_of_null_is_a_type_error() {
        let mut record = record_with(vec![Value::Null]);
        assert!(matches!(
            property_get(&mut record, "x"),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn map_and_filter_by_property() {
        let mut record = ExecutionRecord::new();
        let mut items = Vec::new();
        for (name, done) in [("a", true), ("b", false), ("c", true)] {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), Value::string(name));
            fields.insert("done".to_string(), Value::Boolean(done));
            items.push(record.heap.alloc_object(fields).unwrap());
        }
        items.push(Value::Null);
        let arr = record.heap.alloc_array(items).unwrap();

        record.push(arr.clone());
        array_map_prop(&mut record, "name").unwrap();
        let names = record.pop().unwrap();
        assert_eq!(
            record.heap.array(names.handle().unwrap()).unwrap(),
            &vec![
                Value::string("a"),
                Value::string("b"),
                Value::string("c"),
                Value::Undefined
            ]
        );

        record.push(arr);
        array_filter_prop(&mut record, "done").unwrap();
        let kept = record.pop().unwrap();
        assert_eq!(record.heap.array(kept.handle().unwrap()).unwrap().len(), 2);
    }

    #[test]
    fn object_keys_are_sorted() {
        let mut record = ExecutionRecord::new();
        new_object(&mut record).unwrap();
        let obj = record.pop().unwrap();
        for key in ["zeta", "alpha"] {
            record.push(obj.clone());
            record.push(Value::Number(1.0));
            property_set(&mut record, key).unwrap();
            record.pop().unwrap();
        }
        record.push(obj);
        object_keys(&mut record).unwrap();
        let keys = record.pop().unwrap();
        assert_eq!(
            record.heap.array(keys.handle().unwrap()).unwrap(),
            &vec![Value::string("alpha"), Value::string("zeta")]
        );
    }

    #[test]
    fn negative_array_index_is_a_runtime_error() {
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::Number(1.0)]).unwrap();
        record.push(arr.clone());
        record.push(Value::Number(-1.0));
        let err = array_get(&mut record).unwrap_err();
        assert_eq!(err, VmError::Runtime("negative array index -1".into()));

        record.push(arr.clone());
        record.push(Value::Number(-2.0));
        record.push(Value::Null);
        assert!(matches!(array_set(&mut record), Err(VmError::Runtime(_))));

        record.push(arr);
        record.push(Value::Number(0.5));
        assert!(matches!(array_get(&mut record), Err(VmError::Runtime(_))));
    }

    #[test]
    fn arrays_reject_non_numeric_indices() {
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::Number(1.0), Value::Number(2.0)]).unwrap();
        for index in [Value::string("abc"), Value::string("1"), Value::Null] {
            record.push(arr.clone());
            record.push(index);
            assert!(matches!(array_get(&mut record), Err(VmError::TypeError(_))));
        }
        record.push(arr);
        record.push(Value::string("0"));
        record.push(Value::Null);
        assert!(matches!(array_set(&mut record), Err(VmError::TypeError(_))));
    }

    #[test]
    fn objects_reject_non_string_keys() {
        let mut record = ExecutionRecord::new();
        let obj = record.heap.alloc_object(BTreeMap::new()).unwrap();
        record.push(obj.clone());
        record.push(Value::Number(1.0));
        record.push(Value::string("v"));
        assert!(matches!(array_set(&mut record), Err(VmError::TypeError(_))));
        assert!(record.heap.object(obj.handle().unwrap()).unwrap().is_empty());

        record.push(obj.clone());
        record.push(Value::Boolean(true));
        assert!(matches!(array_get(&mut record), Err(VmError::TypeError(_))));

        record.push(obj.clone());
        record.push(Value::string("k"));
        record.push(Value::string("v"));
        array_set(&mut record).unwrap();
        record.pop().unwrap();
        record.push(obj);
        record.push(Value::string("k"));
        array_get(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), Value::string("v"));
    }
}
