//! Opcode dispatch. One arm per opcode; each arm pops every operand it
//! declares before inspecting any of them, so a short stack always reports
//! `StackUnderflow` first.

use super::collections;
use super::iterators;
use super::ops::{self, ArithOp, CmpOp};
use super::record::ExecutionRecord;
use super::strings;
use super::{Engine, Flow, VmError};
use cogvm_core::isa::{Instruction, OpCode, Operand};
use cogvm_core::json::{self, JsonError};
use cogvm_core::values::Value;
use cogvm_runtime::sandbox::ListOptions;

fn name_operand(instr: &Instruction) -> Result<&str, VmError> {
    match &instr.operand {
        Some(Operand::String(name)) => Ok(name),
        _ => Err(VmError::runtime(format!(
            "{} requires a name operand",
            instr.opcode
        ))),
    }
}

fn target_operand(instr: &Instruction) -> Result<usize, VmError> {
    match &instr.operand {
        Some(Operand::Number(n)) if *n < 0.0 => Err(VmError::runtime(format!(
            "negative jump target {}",
            n
        ))),
        Some(Operand::Number(n)) if n.fract() == 0.0 && n.is_finite() => Ok(*n as usize),
        _ => Err(VmError::runtime(format!(
            "{} requires an instruction index operand",
            instr.opcode
        ))),
    }
}

fn unary_number(record: &mut ExecutionRecord, op: &str, f: fn(f64) -> f64) -> Result<(), VmError> {
    let v = record.pop()?;
    let n = ops::coerce_number(&v, op)?;
    record.push(Value::Number(f(n)));
    Ok(())
}

fn binary(
    record: &mut ExecutionRecord,
    f: impl FnOnce(&ExecutionRecord, Value, Value) -> Result<Value, VmError>,
) -> Result<(), VmError> {
    let (a, b) = record.pop_pair()?;
    let result = f(&*record, a, b)?;
    record.push(result);
    Ok(())
}

fn expect_path(value: Value, op: OpCode) -> Result<String, VmError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(VmError::type_error(format!(
            "{} expects a path string, got {}",
            op,
            other.kind_name()
        ))),
    }
}

impl Engine {
    pub(crate) fn dispatch(
        &self,
        record: &mut ExecutionRecord,
        instr: &Instruction,
    ) -> Result<Flow, VmError> {
        // `OpCode::ToString` shadows the prelude trait below; stick to
        // `format!` and `String::from` inside this match.
        use OpCode::*;
        match instr.opcode {
            // Stack
            Push => {
                let operand = instr
                    .operand
                    .as_ref()
                    .ok_or_else(|| VmError::runtime("PUSH requires an operand"))?;
                record.push(Value::from(operand));
            }
            PushUndefined => record.push(Value::Undefined),
            Pop => {
                record.pop()?;
            }
            Dup => {
                let top = record.peek(0)?.clone();
                record.push(top);
            }
            Dup2 => {
                let a = record.peek(1)?.clone();
                let b = record.peek(0)?.clone();
                record.push(a);
                record.push(b);
            }
            Swap => {
                let (a, b) = record.pop_pair()?;
                record.push(b);
                record.push(a);
            }

            // Variables
            Load => {
                let name = name_operand(instr)?;
                let value = record
                    .variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| VmError::runtime(format!("undefined variable '{}'", name)))?;
                record.push(value);
            }
            Store => {
                let value = record.pop()?;
                let name = name_operand(instr)?;
                record.variables.insert(String::from(name), value);
            }

            // Arithmetic
            Add => binary(record, |r, a, b| ops::add(&r.heap, &a, &b))?,
            Sub => binary(record, |_, a, b| ops::arith(ArithOp::Sub, &a, &b))?,
            Mul => binary(record, |_, a, b| ops::arith(ArithOp::Mul, &a, &b))?,
            Div => binary(record, |_, a, b| ops::arith(ArithOp::Div, &a, &b))?,
            Mod => binary(record, |_, a, b| ops::arith(ArithOp::Mod, &a, &b))?,
            UnaryMinus => unary_number(record, "UNARY_MINUS", |n| -n)?,
            UnaryPlus => unary_number(record, "UNARY_PLUS", |n| n)?,
            Inc => unary_number(record, "INC", |n| n + 1.0)?,
            Dec => unary_number(record, "DEC", |n| n - 1.0)?,

            // Comparison
            Eq => binary(record, |_, a, b| Ok(Value::Boolean(a.loose_equals(&b))))?,
            Neq => binary(record, |_, a, b| Ok(Value::Boolean(!a.loose_equals(&b))))?,
            EqStrict => binary(record, |_, a, b| Ok(Value::Boolean(a == b)))?,
            NeqStrict => binary(record, |_, a, b| Ok(Value::Boolean(a != b)))?,
            Lt => binary(record, |_, a, b| ops::compare(CmpOp::Lt, &a, &b).map(Value::Boolean))?,
            Gt => binary(record, |_, a, b| ops::compare(CmpOp::Gt, &a, &b).map(Value::Boolean))?,
            Lte => binary(record, |_, a, b| ops::compare(CmpOp::Lte, &a, &b).map(Value::Boolean))?,
            Gte => binary(record, |_, a, b| ops::compare(CmpOp::Gte, &a, &b).map(Value::Boolean))?,

            // Logic
            And => binary(record, |_, a, b| Ok(ops::and(a, b)))?,
            Or => binary(record, |_, a, b| Ok(ops::or(a, b)))?,
            Not => {
                let v = record.pop()?;
                record.push(Value::Boolean(!v.is_truthy()));
            }

            // Control flow
            Jump | Break | Continue => return Ok(Flow::Jump(target_operand(instr)?)),
            JumpIf | JumpIfTrue => {
                let cond = record.pop()?;
                let target = target_operand(instr)?;
                if cond.is_truthy() {
                    return Ok(Flow::Jump(target));
                }
            }
            JumpIfFalse => {
                let cond = record.pop()?;
                let target = target_operand(instr)?;
                if !cond.is_truthy() {
                    return Ok(Flow::Jump(target));
                }
            }
            Return => {
                let value = record.stack.pop().unwrap_or(Value::Undefined);
                // The result is reported as JSON, so it must have a JSON form.
                json::to_json(&record.heap, &value).map_err(|e| match e {
                    JsonError::Cyclic => VmError::runtime("cannot return a circular structure"),
                    other => VmError::from(other),
                })?;
                return Ok(Flow::Complete(Some(value)));
            }
            Halt => return Ok(Flow::Complete(None)),
            Call => return Err(VmError::InvalidOpcode(instr.opcode.mnemonic().into())),

            // Iteration
            IterStart => iterators::iter_start(record)?,
            IterNext => iterators::iter_next(record)?,
            IterEnd => iterators::iter_end(record)?,
            ObjectIterStart => iterators::object_iter_start(record)?,
            ObjectIterNext => iterators::object_iter_next(record)?,

            // Arrays and objects
            ArrayNew => collections::new_array(record)?,
            ArrayPush => collections::array_push(record)?,
            ArrayGet => collections::array_get(record)?,
            ArraySet => collections::array_set(record)?,
            ArrayLen => collections::array_len(record)?,
            ArrayMapProp => {
                record.peek(0)?;
                collections::array_map_prop(record, name_operand(instr)?)?
            }
            ArrayFilterProp => {
                record.peek(0)?;
                collections::array_filter_prop(record, name_operand(instr)?)?
            }
            ObjectCreate => collections::new_object(record)?,
            ObjectKeys => collections::object_keys(record)?,
            PropertyGet => {
                record.peek(0)?;
                collections::property_get(record, name_operand(instr)?)?
            }
            PropertySet => {
                record.peek(1)?;
                collections::property_set(record, name_operand(instr)?)?
            }

            // Strings
            Concat => strings::concat(record)?,
            Length => strings::length(record)?,
            Substring => strings::substring(record)?,
            IndexOf => strings::index_of(record)?,
            Split => strings::split(record)?,
            Slice => strings::slice(record)?,
            CharAt => strings::char_at(record)?,
            ToUpperCase => strings::to_upper_case(record)?,
            ToLowerCase => strings::to_lower_case(record)?,
            Trim => strings::trim(record)?,
            Join => strings::join(record)?,
            Match => strings::match_all(record)?,
            Test => strings::regex_test(record)?,
            Replace => strings::replace(record)?,

            // JSON and types
            JsonParse => {
                let text = record.pop()?;
                let text = match text {
                    Value::String(s) => s,
                    other => {
                        return Err(VmError::type_error(format!(
                            "JSON_PARSE expects a string, got {}",
                            other.kind_name()
                        )))
                    }
                };
                let parsed: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| VmError::runtime(format!("invalid JSON: {}", e)))?;
                let value = json::from_json(&mut record.heap, &parsed)?;
                record.push(value);
            }
            JsonStringify => {
                let v = record.pop()?;
                let out = match json::to_json(&record.heap, &v)? {
                    Some(j) => Value::String(format!("{}", j)),
                    None => Value::Undefined,
                };
                record.push(out);
            }
            Typeof => {
                let v = record.pop()?;
                record.push(Value::string(v.type_name()));
            }
            ToString => {
                let v = record.pop()?;
                let s = record.heap.display(&v)?;
                record.push(Value::String(s));
            }

            // File access
            FsListFiles => {
                let (path, options) = record.pop_pair()?;
                let path = expect_path(path, instr.opcode)?;
                let options = self.list_options(record, &options)?;
                let names = self
                    .files
                    .list_files(&path, &options)
                    .into_iter()
                    .map(Value::String)
                    .collect();
                let result = record.heap.alloc_array(names)?;
                record.push(result);
            }
            FsReadFile => {
                let path = expect_path(record.pop()?, instr.opcode)?;
                let content = self.files.read_file(&path);
                record.push(content.map_or(Value::Null, Value::String));
            }
            FsWriteFile => {
                let (path, content) = record.pop_pair()?;
                let path = expect_path(path, instr.opcode)?;
                let content = record.heap.display(&content)?;
                let ok = self.files.write_file(&path, &content);
                record.push(Value::Boolean(ok));
            }

            // Suspension and output
            Cc => {
                let prompt = match record.pop()? {
                    Value::String(s) => s,
                    other => {
                        return Err(VmError::type_error(format!(
                            "CC expects a string prompt, got {}",
                            other.kind_name()
                        )))
                    }
                };
                return Ok(Flow::Suspend(prompt));
            }
            Print => {
                let v = record.pop()?;
                let line = match &v {
                    Value::ArrayRef(_) | Value::ObjectRef(_) => json::to_json(&record.heap, &v)?
                        .map(|j| format!("{}", j))
                        .unwrap_or_default(),
                    other => record.heap.display(other)?,
                };
                tracing::debug!(line = %line, "program output");
                record.output.push(line);
            }
        }
        Ok(Flow::Next)
    }

    fn list_options(
        &self,
        record: &ExecutionRecord,
        options: &Value,
    ) -> Result<ListOptions, VmError> {
        match options {
            Value::Null | Value::Undefined => Ok(ListOptions::default()),
            Value::ObjectRef(_) => {
                let j = json::to_json(&record.heap, options)?.unwrap_or(serde_json::Value::Null);
                serde_json::from_value(j)
                    .map_err(|e| VmError::type_error(format!("invalid listing options: {}", e)))
            }
            other => Err(VmError::type_error(format!(
                "FS_LIST_FILES options must be an object, got {}",
                other.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogvm_runtime::sandbox::StubFiles;
    use std::sync::Arc;
    use strum::IntoEnumIterator;

    fn operand_for(op: OpCode) -> Instruction {
        use cogvm_core::isa::OperandKind;
        match op.operand_kind() {
            OperandKind::None => Instruction::new(op),
            OperandKind::Literal => Instruction::with(op, 1.0),
            OperandKind::Name => Instruction::with(op, "x"),
            OperandKind::Target => Instruction::with(op, 0.0),
        }
    }

    #[test]
    fn handlers_guard_their_own_operands() {
        let engine = Engine::default();
        for op in OpCode::iter() {
            let spec = op.spec();
            if spec.stack_in == 0 {
                continue;
            }
            let mut record = ExecutionRecord::new();
            for _ in 0..spec.stack_in - 1 {
                record.push(Value::Number(1.0));
            }
            let result = engine.dispatch(&mut record, &operand_for(op));
            assert_eq!(result, Err(VmError::StackUnderflow), "{}", op);
        }
    }

    fn eval(engine: &Engine, record: &mut ExecutionRecord, instr: Instruction) -> Value {
        assert_eq!(engine.dispatch(record, &instr).unwrap(), Flow::Next);
        record.pop().unwrap()
    }

    #[test]
    fn return_rejects_circular_values() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(Vec::new()).unwrap();
        record.heap.array_mut(arr.handle().unwrap()).unwrap().push(arr.clone());
        record.push(arr);
        assert_eq!(
            engine.dispatch(&mut record, &Instruction::new(OpCode::Return)),
            Err(VmError::Runtime("cannot return a circular structure".into()))
        );

        let mut record = ExecutionRecord::new();
        let inner = record.heap.alloc_array(vec![Value::Number(1.0)]).unwrap();
        let outer = record.heap.alloc_array(vec![inner.clone(), inner]).unwrap();
        record.push(outer.clone());
        assert_eq!(
            engine.dispatch(&mut record, &Instruction::new(OpCode::Return)),
            Ok(Flow::Complete(Some(outer)))
        );
    }

    #[test]
    fn stack_shuffles() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        record.push(Value::Number(1.0));
        record.push(Value::Number(2.0));
        engine
            .dispatch(&mut record, &Instruction::new(OpCode::Dup2))
            .unwrap();
        engine
            .dispatch(&mut record, &Instruction::new(OpCode::Swap))
            .unwrap();
        assert_eq!(
            record.stack,
            vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(2.0),
                Value::Number(1.0)
            ]
        );
    }

    #[test]
    fn null_operand_pushes_null() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        let v = eval(&engine, &mut record, Instruction::with(OpCode::Push, Operand::Null));
        assert_eq!(v, Value::Null);
        assert!(engine
            .dispatch(&mut record, &Instruction::new(OpCode::Push))
            .is_err());
    }

    #[test]
    fn load_of_unbound_name_fails() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        assert!(matches!(
            engine.dispatch(&mut record, &Instruction::with(OpCode::Load, "nope")),
            Err(VmError::Runtime(_))
        ));
    }

    #[test]
    fn conditional_jumps_pop_the_condition() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        record.push(Value::Number(0.0));
        assert_eq!(
            engine
                .dispatch(&mut record, &Instruction::with(OpCode::JumpIfFalse, 7.0))
                .unwrap(),
            Flow::Jump(7)
        );
        record.push(Value::Number(0.0));
        assert_eq!(
            engine
                .dispatch(&mut record, &Instruction::with(OpCode::JumpIf, 7.0))
                .unwrap(),
            Flow::Next
        );
        assert!(record.stack.is_empty());
    }

    #[test]
    fn negative_jump_target_is_a_runtime_error() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        assert!(matches!(
            engine.dispatch(&mut record, &Instruction::with(OpCode::Break, -1.0)),
            Err(VmError::Runtime(_))
        ));
    }

    #[test]
    fn typeof_and_to_string() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::Number(1.5), Value::Boolean(true)]).unwrap();
        record.push(arr.clone());
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::Typeof)),
            Value::string("object")
        );
        record.push(Value::Null);
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::Typeof)),
            Value::string("object")
        );
        record.push(arr);
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::ToString)),
            Value::string("1.5,true")
        );
    }

    #[test]
    fn json_round_trip_through_the_heap() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        record.push(Value::string(r#"{"b":[1,2],"a":null}"#));
        let parsed = eval(&engine, &mut record, Instruction::new(OpCode::JsonParse));
        assert!(matches!(parsed, Value::ObjectRef(_)));
        record.push(parsed);
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::JsonStringify)),
            Value::string(r#"{"a":null,"b":[1,2]}"#)
        );
        record.push(Value::Undefined);
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::JsonStringify)),
            Value::Undefined
        );
        record.push(Value::string("{oops"));
        assert!(matches!(
            engine.dispatch(&mut record, &Instruction::new(OpCode::JsonParse)),
            Err(VmError::Runtime(_))
        ));
    }

    #[test]
    fn stringify_of_a_cycle_fails() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![]).unwrap();
        record
            .heap
            .array_mut(arr.handle().unwrap())
            .unwrap()
            .push(arr.clone());
        record.push(arr);
        assert!(matches!(
            engine.dispatch(&mut record, &Instruction::new(OpCode::JsonStringify)),
            Err(VmError::Runtime(_))
        ));
    }

    #[test]
    fn print_formats() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        let arr = record.heap.alloc_array(vec![Value::string("a"), Value::Number(2.0)]).unwrap();
        for v in [Value::string("raw text"), Value::Number(3.0), arr] {
            record.push(v);
            engine
                .dispatch(&mut record, &Instruction::new(OpCode::Print))
                .unwrap();
        }
        assert_eq!(record.output, vec!["raw text", "3", r#"["a",2]"#]);
    }

    #[test]
    fn cc_needs_a_string_prompt() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        record.push(Value::Number(1.0));
        assert!(matches!(
            engine.dispatch(&mut record, &Instruction::new(OpCode::Cc)),
            Err(VmError::TypeError(_))
        ));
        record.push(Value::string("why?"));
        assert_eq!(
            engine
                .dispatch(&mut record, &Instruction::new(OpCode::Cc))
                .unwrap(),
            Flow::Suspend("why?".into())
        );
    }

    #[test]
    fn file_opcodes_use_the_accessor() {
        let files = Arc::new(StubFiles::new().with_file("notes/a.md", "alpha"));
        let engine = Engine::new(files.clone());
        let mut record = ExecutionRecord::new();

        record.push(Value::string("notes/a.md"));
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::FsReadFile)),
            Value::string("alpha")
        );
        record.push(Value::string("notes/missing.md"));
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::FsReadFile)),
            Value::Null
        );

        record.push(Value::string("notes/b.md"));
        record.push(Value::string("beta"));
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::FsWriteFile)),
            Value::Boolean(true)
        );
        assert_eq!(files.contents("notes/b.md").as_deref(), Some("beta"));

        record.push(Value::string("notes"));
        record.push(Value::Undefined);
        let listing = eval(&engine, &mut record, Instruction::new(OpCode::FsListFiles));
        assert_eq!(
            record.heap.array(listing.handle().unwrap()).unwrap(),
            &vec![Value::string("notes/a.md"), Value::string("notes/b.md")]
        );
    }

    #[test]
    fn default_engine_denies_file_access() {
        let engine = Engine::default();
        let mut record = ExecutionRecord::new();
        record.push(Value::string("/etc/hostname"));
        assert_eq!(
            eval(&engine, &mut record, Instruction::new(OpCode::FsReadFile)),
            Value::Null
        );
    }
}
