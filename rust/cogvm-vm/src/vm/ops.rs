//! Arithmetic, comparison, and logic operations for the VM.

use super::VmError;
use cogvm_core::heap::Heap;
use cogvm_core::values::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Lt,
    Gt,
    Lte,
    Gte,
}

/// Numeric reading of `value`, or a TypeError naming the operation.
pub(crate) fn coerce_number(value: &Value, op: &str) -> Result<f64, VmError> {
    value.to_number().ok_or_else(|| {
        VmError::type_error(format!(
            "{} expects a number, got {}",
            op,
            describe(value)
        ))
    })
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("string {:?}", s),
        other => other.kind_name().to_string(),
    }
}

/// `ADD`: numeric when both sides coerce, otherwise concatenation when
/// either side is a string.
pub(crate) fn add(heap: &Heap, a: &Value, b: &Value) -> Result<Value, VmError> {
    if let (Some(x), Some(y)) = (a.to_number(), b.to_number()) {
        return Ok(Value::Number(x + y));
    }
    if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
        let mut out = heap.display(a)?;
        out.push_str(&heap.display(b)?);
        return Ok(Value::String(out));
    }
    Err(VmError::type_error(format!(
        "cannot add {} and {}",
        a.kind_name(),
        b.kind_name()
    )))
}

pub(crate) fn arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value, VmError> {
    let name = match op {
        ArithOp::Sub => "SUB",
        ArithOp::Mul => "MUL",
        ArithOp::Div => "DIV",
        ArithOp::Mod => "MOD",
    };
    let x = coerce_number(a, name)?;
    let y = coerce_number(b, name)?;
    let result = match op {
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => {
            if y == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            x / y
        }
        ArithOp::Mod => {
            if y == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            x % y
        }
    };
    Ok(Value::Number(result))
}

/// Relational comparison: two strings compare lexicographically, anything
/// else numerically. NaN compares false.
pub(crate) fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, VmError> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(match op {
            CmpOp::Lt => x < y,
            CmpOp::Gt => x > y,
            CmpOp::Lte => x <= y,
            CmpOp::Gte => x >= y,
        });
    }
    let x = coerce_number(a, "comparison")?;
    let y = coerce_number(b, "comparison")?;
    Ok(match op {
        CmpOp::Lt => x < y,
        CmpOp::Gt => x > y,
        CmpOp::Lte => x <= y,
        CmpOp::Gte => x >= y,
    })
}

/// `AND` yields `a` when it is falsy, otherwise `b`.
pub(crate) fn and(a: Value, b: Value) -> Value {
    if a.is_truthy() {
        b
    } else {
        a
    }
}

/// `OR` yields `a` when it is truthy, otherwise `b`.
pub(crate) fn or(a: Value, b: Value) -> Value {
    if a.is_truthy() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogvm_core::values::Handle;

    #[test]
    fn add_coerces_numeric_strings() {
        let heap = Heap::new();
        assert_eq!(
            add(&heap, &Value::string("10"), &Value::string("20")).unwrap(),
            Value::Number(30.0)
        );
        assert_eq!(
            add(&heap, &Value::string("hello"), &Value::Number(5.0)).unwrap(),
            Value::string("hello5")
        );
        assert_eq!(
            add(&heap, &Value::Boolean(true), &Value::Null).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn add_concatenates_display_forms() {
        let mut heap = Heap::new();
        let arr = heap.alloc_array(vec![Value::Number(1.0), Value::Number(2.0)]).unwrap();
        assert_eq!(
            add(&heap, &Value::string("x:"), &arr).unwrap(),
            Value::string("x:1,2")
        );
        assert_eq!(
            add(&heap, &Value::Undefined, &Value::string("!")).unwrap(),
            Value::string("undefined!")
        );
    }

    #[test]
    fn add_without_strings_or_numbers_is_a_type_error() {
        let heap = Heap::new();
        assert!(matches!(
            add(&heap, &Value::Undefined, &Value::Number(1.0)),
            Err(VmError::TypeError(_))
        ));
        assert!(matches!(
            add(&heap, &Value::ArrayRef(Handle(0)), &Value::Null),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            arith(ArithOp::Div, &Value::Number(1.0), &Value::Number(0.0)),
            Err(VmError::DivisionByZero)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Number(1.0), &Value::string("0")),
            Err(VmError::DivisionByZero)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Number(-7.0), &Value::Number(3.0)).unwrap(),
            Value::Number(-1.0)
        );
    }

    #[test]
    fn comparisons() {
        let lt = |a: Value, b: Value| compare(CmpOp::Lt, &a, &b).unwrap();
        assert!(lt(Value::string("apple"), Value::string("banana")));
        assert!(lt(Value::string("10"), Value::string("9")));
        assert!(lt(Value::string("9"), Value::Number(10.0)));
        assert!(!lt(Value::Number(f64::NAN), Value::Number(1.0)));
        assert!(compare(CmpOp::Gte, &Value::Null, &Value::Number(0.0)).unwrap());
        assert!(matches!(
            compare(CmpOp::Gt, &Value::string("abc"), &Value::Number(1.0)),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn logic_returns_deciding_operand() {
        assert_eq!(and(Value::Number(0.0), Value::string("x")), Value::Number(0.0));
        assert_eq!(and(Value::Number(1.0), Value::string("x")), Value::string("x"));
        assert_eq!(or(Value::string(""), Value::Null), Value::Null);
        assert_eq!(or(Value::string("a"), Value::Null), Value::string("a"));
    }
}
