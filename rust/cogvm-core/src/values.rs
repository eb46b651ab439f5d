//! Runtime value representation.
//!
//! Primitive values are held inline. Arrays and objects live in the
//! [`Heap`](crate::heap::Heap) and are referred to by [`Handle`]; copying a
//! `Value` copies the handle, never the payload.

use crate::isa::Operand;
use std::fmt;

/// Integer identifier of a heap-allocated array or object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime values in the VM.
///
/// The derived `PartialEq` is the dialect's strict equality: no coercion,
/// and references compare by handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
    Undefined,
    ArrayRef(Handle),
    ObjectRef(Handle),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::Null | Value::Undefined => false,
            Value::ArrayRef(_) | Value::ObjectRef(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Result of the `typeof` operator.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Undefined => "undefined",
            Value::Null | Value::ArrayRef(_) | Value::ObjectRef(_) => "object",
        }
    }

    /// Kind name used in diagnostics; unlike `typeof`, arrays and null are
    /// told apart.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::ArrayRef(_) => "array",
            Value::ObjectRef(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::ArrayRef(h) | Value::ObjectRef(h) => Some(*h),
            _ => None,
        }
    }

    /// Numeric coercion. `None` means the value has no numeric reading
    /// (undefined, references, non-numeric strings).
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            Value::String(s) => parse_numeric(s),
            Value::Undefined | Value::ArrayRef(_) | Value::ObjectRef(_) => None,
        }
    }

    /// Loose (`==`) equality.
    pub fn loose_equals(&self, other: &Value) -> bool {
        if std::mem::discriminant(self) == std::mem::discriminant(other) {
            return self == other;
        }
        match (self, other) {
            (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null) => true,
            (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
                parse_numeric(s).is_some_and(|parsed| parsed == *n)
            }
            (Value::Boolean(b), rest) | (rest, Value::Boolean(b)) => {
                Value::Number(if *b { 1.0 } else { 0.0 }).loose_equals(rest)
            }
            _ => false,
        }
    }
}

impl From<&Operand> for Value {
    fn from(operand: &Operand) -> Self {
        match operand {
            Operand::Null => Value::Null,
            Operand::Bool(b) => Value::Boolean(*b),
            Operand::Number(n) => Value::Number(*n),
            Operand::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// Parse a string the way numeric coercion reads it: surrounding whitespace
/// is ignored and the empty string reads as zero.
pub fn parse_numeric(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    match t {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    // Rust accepts "inf" and "nan" spellings the dialect does not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Format a number the way the dialect displays it: integral values carry
/// no fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.abs() >= 1e21 || n.abs() < 1e-6 {
        let text = format!("{:e}", n);
        match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        }
    } else {
        format!("{}", n)
    }
}
