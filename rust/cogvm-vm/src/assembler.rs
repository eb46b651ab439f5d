//! Bytecode assembler.
//!
//! Accepts either a JSON array of instructions or line-oriented assembly:
//!
//! ```text
//! # count down from three
//!         PUSH 3
//!         STORE n
//! top:    LOAD n
//!         JUMP_IF_FALSE done
//!         LOAD n
//!         DEC
//!         STORE n
//!         JUMP top
//! done:   HALT
//! ```
//!
//! Operands are JSON literals (`"text"`, `1.5`, `true`, `null`) or bare
//! identifiers, which name a variable or property, or a label for jumps.

use cogvm_core::isa::{Instruction, OpCode, Operand, OperandKind, Program};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// One diagnostic. Lines are 1-based; 0 means the whole input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    fn new(line: u32, message: impl Into<String>) -> Self {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

/// Turns program source into bytecode. Failures are a list of diagnostics
/// and never reach the engine.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Program, Vec<CompileError>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler;

impl Compiler for Assembler {
    fn compile(&self, source: &str) -> Result<Program, Vec<CompileError>> {
        let program = if source.trim_start().starts_with('[') {
            Program::from_json(source)
                .map_err(|e| vec![CompileError::new(e.line() as u32, e.to_string())])?
        } else {
            assemble(source)?
        };
        let errors = validate(&program);
        if errors.is_empty() {
            Ok(program)
        } else {
            Err(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Text assembly
// ---------------------------------------------------------------------------

struct Fixup {
    index: usize,
    label: String,
    line: u32,
}

fn assemble(source: &str) -> Result<Program, Vec<CompileError>> {
    let mut instructions = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut fixups = Vec::new();
    let mut errors = Vec::new();

    for (n, raw) in source.lines().enumerate() {
        let line = n as u32 + 1;
        let mut text = strip_comment(raw).trim();

        while let Some((label, rest)) = split_label(text) {
            if labels.insert(label.to_string(), instructions.len()).is_some() {
                errors.push(CompileError::new(line, format!("duplicate label '{}'", label)));
            }
            text = rest;
        }
        if text.is_empty() {
            continue;
        }

        let (mnemonic, operand_text) = match text.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (text, ""),
        };
        let opcode = match OpCode::from_str(mnemonic) {
            Ok(op) => op,
            Err(_) => {
                errors.push(CompileError::new(
                    line,
                    format!("unknown opcode '{}'", mnemonic),
                ));
                continue;
            }
        };

        let operand = if operand_text.is_empty() {
            None
        } else {
            match parse_operand(operand_text) {
                Ok(ParsedOperand::Literal(op)) => Some(op),
                Ok(ParsedOperand::Word(word)) if opcode.is_jump() => {
                    fixups.push(Fixup {
                        index: instructions.len(),
                        label: word,
                        line,
                    });
                    None
                }
                Ok(ParsedOperand::Word(word)) => Some(Operand::String(word)),
                Err(message) => {
                    errors.push(CompileError::new(line, message));
                    continue;
                }
            }
        };
        instructions.push(Instruction {
            opcode,
            operand,
            source_line: Some(line),
        });
    }

    for fixup in fixups {
        match labels.get(&fixup.label) {
            Some(&target) => {
                instructions[fixup.index].operand = Some(Operand::Number(target as f64));
            }
            None => errors.push(CompileError::new(
                fixup.line,
                format!("undefined label '{}'", fixup.label),
            )),
        }
    }

    if errors.is_empty() {
        Ok(Program::new(instructions))
    } else {
        errors.sort_by_key(|e| e.line);
        Err(errors)
    }
}

/// Drop a `#` comment, ignoring `#` inside double-quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '-'))
}

/// `label: rest` → `(label, rest)`.
fn split_label(text: &str) -> Option<(&str, &str)> {
    let (head, rest) = text.split_once(':')?;
    let head = head.trim_end();
    if is_identifier(head) && !head.contains(char::is_whitespace) {
        Some((head, rest.trim_start()))
    } else {
        None
    }
}

enum ParsedOperand {
    Literal(Operand),
    Word(String),
}

fn parse_operand(text: &str) -> Result<ParsedOperand, String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Null) => Ok(ParsedOperand::Literal(Operand::Null)),
        Ok(serde_json::Value::Bool(b)) => Ok(ParsedOperand::Literal(Operand::Bool(b))),
        Ok(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(|f| ParsedOperand::Literal(Operand::Number(f)))
            .ok_or_else(|| format!("number out of range: {}", n)),
        Ok(serde_json::Value::String(s)) => Ok(ParsedOperand::Literal(Operand::String(s))),
        Ok(_) => Err(format!(
            "operand must be a string, number, boolean or null: {}",
            text
        )),
        Err(_) if is_identifier(text) => Ok(ParsedOperand::Word(text.to_string())),
        Err(e) => Err(format!("invalid operand {}: {}", text, e)),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every operand against what its opcode expects.
fn validate(program: &Program) -> Vec<CompileError> {
    let len = program.len();
    let mut errors = Vec::new();
    for (index, instr) in program.instructions().iter().enumerate() {
        let line = instr.source_line.unwrap_or(0);
        let op = instr.opcode;
        let problem = match (op.operand_kind(), &instr.operand) {
            (OperandKind::None, Some(_)) => Some(format!("{} takes no operand", op)),
            (OperandKind::None, None) => None,
            (OperandKind::Literal, None) => Some(format!("{} requires an operand", op)),
            (OperandKind::Literal, Some(_)) => None,
            (OperandKind::Name, Some(Operand::String(name))) if !name.is_empty() => None,
            (OperandKind::Name, _) => Some(format!("{} requires a name operand", op)),
            (OperandKind::Target, Some(Operand::Number(t))) => {
                if *t < 0.0 || t.fract() != 0.0 || *t > len as f64 {
                    Some(format!(
                        "{} target {} is not an instruction index (program has {} instructions)",
                        op, t, len
                    ))
                } else {
                    None
                }
            }
            (OperandKind::Target, _) => Some(format!("{} requires a jump target", op)),
        };
        if let Some(message) = problem {
            errors.push(CompileError::new(
                line,
                format!("instruction {}: {}", index, message),
            ));
        }
    }
    errors
}
