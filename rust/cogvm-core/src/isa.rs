//! Bytecode instruction set.
//!
//! A program is an immutable, ordered sequence of [`Instruction`]s. The
//! opcode set is closed: the engine dispatches with an exhaustive `match`,
//! and every opcode declares its stack arity through [`OpCode::spec`].

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Closed set of VM opcodes.
///
/// Binary operators pop `b` then `a` and compute `a <op> b`. Jump operands
/// are absolute instruction indices.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OpCode {
    // Stack
    Push,
    PushUndefined,
    Pop,
    Dup,
    #[serde(rename = "DUP2")]
    #[strum(serialize = "DUP2")]
    Dup2,
    Swap,

    // Variables
    Load,
    Store,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    UnaryMinus,
    UnaryPlus,
    Inc,
    Dec,

    // Comparison
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    EqStrict,
    NeqStrict,

    // Logic
    And,
    Or,
    Not,

    // Control flow
    Jump,
    JumpIf,
    JumpIfFalse,
    JumpIfTrue,
    Return,
    Break,
    Continue,
    /// Reserved. The dialect has no VM-level calls; the engine has no handler.
    Call,

    // Iteration
    IterStart,
    IterNext,
    IterEnd,
    ObjectIterStart,
    ObjectIterNext,

    // Arrays
    ArrayNew,
    ArrayPush,
    ArrayGet,
    ArraySet,
    ArrayLen,
    ArrayMapProp,
    ArrayFilterProp,

    // Objects
    ObjectCreate,
    ObjectKeys,
    PropertyGet,
    PropertySet,

    // Strings
    Concat,
    Length,
    Substring,
    IndexOf,
    Split,
    Slice,
    CharAt,
    ToUpperCase,
    ToLowerCase,
    Trim,
    Join,
    Match,
    Test,
    Replace,

    // JSON
    JsonParse,
    JsonStringify,

    // Types
    Typeof,
    ToString,

    // File system (delegated to the sandbox)
    FsListFiles,
    FsReadFile,
    FsWriteFile,

    /// Cognitive call: suspend and ask the external actor.
    Cc,
    Print,
    Halt,
}

/// What kind of operand an opcode expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Any literal (PUSH).
    Literal,
    /// A variable or property name.
    Name,
    /// An absolute, non-negative instruction index.
    Target,
}

/// Declared stack arity of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSpec {
    /// Values the handler pops.
    pub stack_in: usize,
    /// Values the handler pushes on success.
    pub stack_out: usize,
    /// When set, the handler manages `pc` itself and the engine must not
    /// advance it.
    pub controls_pc: bool,
}

const fn spec(stack_in: usize, stack_out: usize) -> OpSpec {
    OpSpec {
        stack_in,
        stack_out,
        controls_pc: false,
    }
}

const fn control(stack_in: usize, stack_out: usize) -> OpSpec {
    OpSpec {
        stack_in,
        stack_out,
        controls_pc: true,
    }
}

impl OpCode {
    /// Stack arity and pc ownership for this opcode.
    pub fn spec(self) -> OpSpec {
        use OpCode::*;
        match self {
            Push | PushUndefined | Load => spec(0, 1),
            Pop | Store | Print => spec(1, 0),
            Dup => spec(1, 2),
            Dup2 => spec(2, 4),
            Swap => spec(2, 2),

            Add | Sub | Mul | Div | Mod => spec(2, 1),
            UnaryMinus | UnaryPlus | Inc | Dec | Not => spec(1, 1),
            Eq | Neq | Lt | Gt | Lte | Gte | EqStrict | NeqStrict | And | Or => spec(2, 1),

            Jump | Break | Continue | Return | Halt => control(0, 0),
            JumpIf | JumpIfFalse | JumpIfTrue => control(1, 0),
            Call => spec(0, 0),

            IterStart | ObjectIterStart => spec(1, 0),
            IterNext | ObjectIterNext => spec(0, 2),
            IterEnd => spec(0, 0),

            ArrayNew | ObjectCreate => spec(0, 1),
            ArrayPush | ArrayGet | PropertySet => spec(2, 1),
            ArraySet => spec(3, 1),
            ArrayLen | ArrayMapProp | ArrayFilterProp | ObjectKeys | PropertyGet => spec(1, 1),

            Concat | IndexOf | Split | CharAt | Join | Match | Test => spec(2, 1),
            Length | ToUpperCase | ToLowerCase | Trim => spec(1, 1),
            Substring | Slice | Replace => spec(3, 1),

            JsonParse | JsonStringify | Typeof | ToString => spec(1, 1),

            FsListFiles | FsWriteFile => spec(2, 1),
            FsReadFile => spec(1, 1),

            // The answer takes the prompt's slot when the execution resumes.
            Cc => control(1, 1),
        }
    }

    /// The operand this opcode requires.
    pub fn operand_kind(self) -> OperandKind {
        use OpCode::*;
        match self {
            Push => OperandKind::Literal,
            Load | Store | PropertyGet | PropertySet | ArrayMapProp | ArrayFilterProp => {
                OperandKind::Name
            }
            Jump | JumpIf | JumpIfFalse | JumpIfTrue | Break | Continue => OperandKind::Target,
            _ => OperandKind::None,
        }
    }

    pub fn is_jump(self) -> bool {
        self.operand_kind() == OperandKind::Target
    }

    /// Canonical upper-case mnemonic, e.g. `"JUMP_IF_FALSE"`.
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// Literal operand attached to an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Operand {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::String(s.to_string())
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Operand::String(s)
    }
}

impl From<f64> for Operand {
    fn from(n: f64) -> Self {
        Operand::Number(n)
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Number(n as f64)
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Operand::Bool(b)
    }
}

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub opcode: OpCode,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_operand"
    )]
    pub operand: Option<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
}

/// A present `"operand": null` is a null literal, not a missing operand.
fn present_operand<'de, D>(deserializer: D) -> Result<Option<Operand>, D::Error>
where
    D: Deserializer<'de>,
{
    Operand::deserialize(deserializer).map(Some)
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: None,
            source_line: None,
        }
    }

    pub fn with(opcode: OpCode, operand: impl Into<Operand>) -> Self {
        Instruction {
            opcode,
            operand: Some(operand.into()),
            source_line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.source_line = Some(line);
        self
    }
}

/// Immutable bytecode of a compiled program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Program { instructions }
    }

    /// Decode a JSON array of instructions. Unknown opcode names are rejected.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Program::new(instructions)
    }
}
