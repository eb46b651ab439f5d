//! The execution record: the complete, durable state of one program run.

use super::iterators::IteratorStack;
use super::VmError;
use cogvm_core::heap::Heap;
use cogvm_core::isa::OpCode;
use cogvm_core::values::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ExecutionStatus {
    Ready,
    Running,
    AwaitingInput,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Error taxonomy surfaced on failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ErrorKind {
    StackUnderflow,
    TypeError,
    DivisionByZero,
    InvalidHandle,
    InvalidOpcode,
    RuntimeError,
}

/// Diagnostic kept on a failed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub pc: usize,
    pub opcode: Option<OpCode>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Some(op) => write!(f, "{} at pc {} ({}): {}", self.kind, self.pc, op, self.message),
            None => write!(f, "{} at pc {}: {}", self.kind, self.pc, self.message),
        }
    }
}

/// State of one execution. Threaded explicitly through the engine and the
/// orchestrator; nothing about a run lives outside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub pc: usize,
    pub stack: Vec<Value>,
    pub variables: BTreeMap<String, Value>,
    pub heap: Heap,
    pub iterators: IteratorStack,
    pub status: ExecutionStatus,
    pub pending_prompt: Option<String>,
    pub output: Vec<String>,
    pub return_value: Option<Value>,
    pub last_error: Option<ExecutionError>,
    /// Instructions executed so far, across every resume.
    pub steps: u64,
}

impl Default for ExecutionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRecord {
    /// A fresh record in the `Ready` state.
    pub fn new() -> Self {
        ExecutionRecord {
            pc: 0,
            stack: Vec::new(),
            variables: BTreeMap::new(),
            heap: Heap::new(),
            iterators: IteratorStack::default(),
            status: ExecutionStatus::Ready,
            pending_prompt: None,
            output: Vec::new(),
            return_value: None,
            last_error: None,
            steps: 0,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `b` then `a`, returning `(a, b)`.
    pub fn pop_pair(&mut self) -> Result<(Value, Value), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    /// Value `depth` slots below the top (0 = top).
    pub fn peek(&self, depth: usize) -> Result<&Value, VmError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn suspend(&mut self, prompt: String) {
        self.status = ExecutionStatus::AwaitingInput;
        self.pending_prompt = Some(prompt);
    }

    pub(crate) fn complete(&mut self, value: Option<Value>) {
        self.status = ExecutionStatus::Completed;
        self.return_value = value;
    }

    pub(crate) fn fail(&mut self, error: &VmError, pc: usize, opcode: Option<OpCode>) {
        self.status = ExecutionStatus::Failed;
        self.last_error = Some(ExecutionError {
            kind: error.kind(),
            message: error.to_string(),
            pc,
            opcode,
        });
    }
}
