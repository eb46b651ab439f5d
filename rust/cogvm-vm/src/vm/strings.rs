//! String instructions. Indices and lengths count Unicode scalar values.

use super::record::ExecutionRecord;
use super::VmError;
use cogvm_core::values::Value;
use regex::Regex;

fn expect_string(value: Value, op: &str) -> Result<String, VmError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(VmError::type_error(format!(
            "{} expects a string, got {}",
            op,
            other.kind_name()
        ))),
    }
}

fn compile(pattern: &str) -> Result<Regex, VmError> {
    Regex::new(pattern)
        .map_err(|e| VmError::runtime(format!("invalid regular expression {:?}: {}", pattern, e)))
}

/// Integer position argument. `undefined` yields `default`; NaN reads as 0.
fn position(value: &Value, default: f64, op: &str) -> Result<f64, VmError> {
    if matches!(value, Value::Undefined) {
        return Ok(default);
    }
    let n = super::ops::coerce_number(value, op)?;
    Ok(if n.is_nan() { 0.0 } else { n.trunc() })
}

/// Resolve a `SLICE` bound: negative counts from the end.
fn relative(n: f64, len: usize) -> usize {
    let len_f = len as f64;
    let resolved = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    resolved as usize
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    if start >= end {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}

pub(crate) fn concat(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (a, b) = record.pop_pair()?;
    let mut out = record.heap.display(&a)?;
    out.push_str(&record.heap.display(&b)?);
    record.push(Value::String(out));
    Ok(())
}

pub(crate) fn length(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let target = record.pop()?;
    let len = match &target {
        Value::String(s) => s.chars().count(),
        Value::ArrayRef(h) => record.heap.array(*h)?.len(),
        other => {
            return Err(VmError::type_error(format!(
                "LENGTH expects a string or array, got {}",
                other.kind_name()
            )))
        }
    };
    record.push(Value::Number(len as f64));
    Ok(())
}

/// `SUBSTRING s start end`: bounds clamp to the string and swap when
/// reversed.
pub(crate) fn substring(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let end = record.pop()?;
    let (s, start) = record.pop_pair()?;
    let s = expect_string(s, "SUBSTRING")?;
    let len = s.chars().count();
    let len_f = len as f64;
    let start = position(&start, 0.0, "SUBSTRING")?.clamp(0.0, len_f) as usize;
    let end = position(&end, len_f, "SUBSTRING")?.clamp(0.0, len_f) as usize;
    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
    record.push(Value::String(char_slice(&s, lo, hi)));
    Ok(())
}

/// `SLICE target start end` on strings and arrays; arrays yield a new
/// array sharing the element values.
pub(crate) fn slice(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let end = record.pop()?;
    let (target, start) = record.pop_pair()?;
    match target {
        Value::String(s) => {
            let len = s.chars().count();
            let lo = relative(position(&start, 0.0, "SLICE")?, len);
            let hi = relative(position(&end, len as f64, "SLICE")?, len);
            record.push(Value::String(char_slice(&s, lo, hi)));
        }
        Value::ArrayRef(h) => {
            let items = record.heap.array(h)?;
            let len = items.len();
            let lo = relative(position(&start, 0.0, "SLICE")?, len);
            let hi = relative(position(&end, len as f64, "SLICE")?, len);
            let part = if lo < hi {
                items[lo..hi].to_vec()
            } else {
                Vec::new()
            };
            let result = record.heap.alloc_array(part)?;
            record.push(result);
        }
        other => {
            return Err(VmError::type_error(format!(
                "SLICE expects a string or array, got {}",
                other.kind_name()
            )))
        }
    }
    Ok(())
}

/// `INDEX_OF haystack needle`: character index in a string, or element
/// index (strict equality) in an array; -1 when absent.
pub(crate) fn index_of(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (haystack, needle) = record.pop_pair()?;
    let found = match &haystack {
        Value::String(s) => {
            let needle = record.heap.display(&needle)?;
            s.find(&needle).map(|byte| s[..byte].chars().count())
        }
        Value::ArrayRef(h) => record.heap.array(*h)?.iter().position(|v| *v == needle),
        other => {
            return Err(VmError::type_error(format!(
                "INDEX_OF expects a string or array, got {}",
                other.kind_name()
            )))
        }
    };
    record.push(Value::Number(found.map_or(-1.0, |i| i as f64)));
    Ok(())
}

pub(crate) fn split(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (s, sep) = record.pop_pair()?;
    let s = expect_string(s, "SPLIT")?;
    let parts: Vec<Value> = match sep {
        Value::Undefined => vec![Value::String(s)],
        sep => {
            let sep = record.heap.display(&sep)?;
            if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::string).collect()
            }
        }
    };
    let result = record.heap.alloc_array(parts)?;
    record.push(result);
    Ok(())
}

pub(crate) fn char_at(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (s, index) = record.pop_pair()?;
    let s = expect_string(s, "CHAR_AT")?;
    let i = position(&index, 0.0, "CHAR_AT")?;
    let c = if i < 0.0 {
        None
    } else {
        s.chars().nth(i as usize)
    };
    record.push(Value::String(c.map(String::from).unwrap_or_default()));
    Ok(())
}

pub(crate) fn to_upper_case(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let s = expect_string(record.pop()?, "TO_UPPER_CASE")?;
    record.push(Value::String(s.to_uppercase()));
    Ok(())
}

pub(crate) fn to_lower_case(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let s = expect_string(record.pop()?, "TO_LOWER_CASE")?;
    record.push(Value::String(s.to_lowercase()));
    Ok(())
}

pub(crate) fn trim(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let s = expect_string(record.pop()?, "TRIM")?;
    record.push(Value::string(s.trim()));
    Ok(())
}

/// `JOIN array sep`; `sep` defaults to `","` and nullish elements print
/// empty.
pub(crate) fn join(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (target, sep) = record.pop_pair()?;
    let h = match target {
        Value::ArrayRef(h) => h,
        other => {
            return Err(VmError::type_error(format!(
                "JOIN expects an array, got {}",
                other.kind_name()
            )))
        }
    };
    let sep = match sep {
        Value::Undefined => ",".to_string(),
        other => record.heap.display(&other)?,
    };
    let mut parts = Vec::new();
    for item in record.heap.array(h)? {
        parts.push(if item.is_nullish() {
            String::new()
        } else {
            record.heap.display(item)?
        });
    }
    record.push(Value::String(parts.join(&sep)));
    Ok(())
}

/// `MATCH s pattern`: every match as an array of strings, or null.
pub(crate) fn match_all(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (s, pattern) = record.pop_pair()?;
    let s = expect_string(s, "MATCH")?;
    let re = compile(&expect_string(pattern, "MATCH")?)?;
    let found: Vec<Value> = re.find_iter(&s).map(|m| Value::string(m.as_str())).collect();
    if found.is_empty() {
        record.push(Value::Null);
    } else {
        let result = record.heap.alloc_array(found)?;
        record.push(result);
    }
    Ok(())
}

pub(crate) fn regex_test(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let (s, pattern) = record.pop_pair()?;
    let s = expect_string(s, "TEST")?;
    let re = compile(&expect_string(pattern, "TEST")?)?;
    record.push(Value::Boolean(re.is_match(&s)));
    Ok(())
}

/// `REPLACE s pattern replacement`: replaces every match; `$1` and `${name}`
/// refer to capture groups.
pub(crate) fn replace(record: &mut ExecutionRecord) -> Result<(), VmError> {
    let replacement = record.pop()?;
    let (s, pattern) = record.pop_pair()?;
    let s = expect_string(s, "REPLACE")?;
    let re = compile(&expect_string(pattern, "REPLACE")?)?;
    let replacement = record.heap.display(&replacement)?;
    let out = re.replace_all(&s, replacement.as_str()).into_owned();
    record.push(Value::String(out));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        op: fn(&mut ExecutionRecord) -> Result<(), VmError>,
        args: Vec<Value>,
    ) -> (ExecutionRecord, Result<Value, VmError>) {
        let mut record = ExecutionRecord::new();
        for arg in args {
            record.push(arg);
        }
        let result = op(&mut record).and_then(|_| record.pop());
        (record, result)
    }

    fn eval(op: fn(&mut ExecutionRecord) -> Result<(), VmError>, args: Vec<Value>) -> Value {
        run(op, args).1.unwrap()
    }

    #[test]
    fn substring_clamps_and_swaps() {
        let s = || Value::string("héllo");
        assert_eq!(
            eval(substring, vec![s(), Value::Number(1.0), Value::Number(3.0)]),
            Value::string("él")
        );
        assert_eq!(
            eval(substring, vec![s(), Value::Number(3.0), Value::Number(1.0)]),
            Value::string("él")
        );
        assert_eq!(
            eval(substring, vec![s(), Value::Number(-4.0), Value::Undefined]),
            Value::string("héllo")
        );
    }

    #[test]
    fn slice_counts_from_the_end() {
        assert_eq!(
            eval(
                slice,
                vec![Value::string("abcdef"), Value::Number(-3.0), Value::Undefined]
            ),
            Value::string("def")
        );
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
        ]).unwrap();
        record.push(arr.clone());
        record.push(Value::Number(1.0));
        record.push(Value::Number(-1.0));
        slice(&mut record).unwrap();
        let part = record.pop().unwrap();
        assert_ne!(part, arr);
        assert_eq!(
            record.heap.array(part.handle().unwrap()).unwrap(),
            &vec![Value::Number(2.0)]
        );
    }

    #[test]
    fn index_of_counts_characters() {
        assert_eq!(
            eval(index_of, vec![Value::string("naïve text"), Value::string("text")]),
            Value::Number(6.0)
        );
        assert_eq!(
            eval(index_of, vec![Value::string("abc"), Value::string("z")]),
            Value::Number(-1.0)
        );
    }

    #[test]
    fn split_and_join() {
        let (record, parts) = run(split, vec![Value::string("a,b,,c"), Value::string(",")]);
        let parts = parts.unwrap();
        assert_eq!(record.heap.array(parts.handle().unwrap()).unwrap().len(), 4);

        let (record, chars) = run(split, vec![Value::string("héy"), Value::string("")]);
        assert_eq!(
            record.heap.array(chars.unwrap().handle().unwrap()).unwrap(),
            &vec![Value::string("h"), Value::string("é"), Value::string("y")]
        );

        let mut record = ExecutionRecord::new();
        let arr = record
            .heap
            .alloc_array(vec![Value::Number(1.0), Value::Null, Value::string("x")]).unwrap();
        record.push(arr);
        record.push(Value::Undefined);
        join(&mut record).unwrap();
        assert_eq!(record.pop().unwrap(), Value::string("1,,x"));
    }

    #[test]
    fn char_at_out_of_range_is_empty() {
        assert_eq!(
            eval(char_at, vec![Value::string("ab"), Value::Number(1.0)]),
            Value::string("b")
        );
        assert_eq!(
            eval(char_at, vec![Value::string("ab"), Value::Number(9.0)]),
            Value::string("")
        );
    }

    #[test]
    fn regex_operations() {
        let (record, found) = run(
            match_all,
            vec![Value::string("a1b22c333"), Value::string(r"\d+")],
        );
        assert_eq!(
            record.heap.array(found.unwrap().handle().unwrap()).unwrap(),
            &vec![Value::string("1"), Value::string("22"), Value::string("333")]
        );
        assert_eq!(
            eval(match_all, vec![Value::string("abc"), Value::string(r"\d")]),
            Value::Null
        );
        assert_eq!(
            eval(regex_test, vec![Value::string("Hello"), Value::string("^H")]),
            Value::Boolean(true)
        );
        assert_eq!(
            eval(
                replace,
                vec![
                    Value::string("2024-01-31"),
                    Value::string(r"(\d+)-(\d+)-(\d+)"),
                    Value::string("$3/$2/$1"),
                ]
            ),
            Value::string("31/01/2024")
        );
    }

    #[test]
    fn invalid_pattern_is_a_runtime_error() {
        let (_, result) = run(regex_test, vec![Value::string("x"), Value::string("(")]);
        assert!(matches!(result, Err(VmError::Runtime(_))));
    }

    #[test]
    fn case_and_trim_need_strings() {
        assert_eq!(eval(trim, vec![Value::string("  hi ")]), Value::string("hi"));
        assert_eq!(
            eval(to_upper_case, vec![Value::string("straße")]),
            Value::string("STRASSE")
        );
        let (_, result) = run(to_lower_case, vec![Value::Number(1.0)]);
        assert!(matches!(result, Err(VmError::TypeError(_))));
    }
}
