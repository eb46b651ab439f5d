//! Stack VM dispatch loop with suspend/resume at cognitive calls.

mod collections;
mod handlers;
pub(crate) mod iterators;
mod ops;
pub(crate) mod record;
mod strings;

pub use iterators::{CursorSource, IteratorCursor, IteratorStack, MAX_ITERATOR_DEPTH};
pub use record::{ErrorKind, ExecutionError, ExecutionRecord, ExecutionStatus};

use cogvm_core::heap::HeapError;
use cogvm_core::isa::{Instruction, OpCode, Program};
use cogvm_core::json::{self, JsonError};
use cogvm_core::values::Value;
use cogvm_runtime::sandbox::{FileAccessor, NoFileAccess};
use serde_json::Value as Json;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by opcode handlers. The engine turns every one of them
/// into a `Failed` record; none escapes [`Engine::execute`] or
/// [`Engine::resume`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("{0}")]
    TypeError(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("no handler for opcode {0}")]
    InvalidOpcode(String),
    #[error("{0}")]
    Runtime(String),
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::StackUnderflow => ErrorKind::StackUnderflow,
            VmError::TypeError(_) => ErrorKind::TypeError,
            VmError::DivisionByZero => ErrorKind::DivisionByZero,
            VmError::Heap(HeapError::Exhausted) => ErrorKind::RuntimeError,
            VmError::Heap(_) => ErrorKind::InvalidHandle,
            VmError::InvalidOpcode(_) => ErrorKind::InvalidOpcode,
            VmError::Runtime(_) => ErrorKind::RuntimeError,
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        VmError::TypeError(msg.into())
    }

    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        VmError::Runtime(msg.into())
    }
}

impl From<JsonError> for VmError {
    fn from(err: JsonError) -> Self {
        match err {
            JsonError::Cyclic => VmError::Runtime(err.to_string()),
            JsonError::Heap(e) => VmError::Heap(e),
        }
    }
}

/// Reasons a record cannot be (re)entered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResumeError {
    #[error("execution has already started (status: {0})")]
    NotReady(ExecutionStatus),
    #[error("execution is not awaiting input (status: {0})")]
    NotAwaitingInput(ExecutionStatus),
    #[error("instruction at pc {0} is not a cognitive call")]
    NotAtCognitiveCall(usize),
}

/// What the engine does after a handler succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Advance `pc` by one.
    Next,
    /// Continue at an absolute instruction index.
    Jump(usize),
    /// Park the execution until an answer to `prompt` arrives.
    Suspend(String),
    /// Finish with an optional return value.
    Complete(Option<Value>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Fail the execution once it has run this many instructions in total.
    pub instruction_limit: Option<u64>,
}

/// The execution engine. Stateless apart from its collaborators: every
/// run's state lives in the [`ExecutionRecord`] passed through it.
#[derive(Clone)]
pub struct Engine {
    files: Arc<dyn FileAccessor>,
    options: EngineOptions,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(Arc::new(NoFileAccess))
    }
}

impl Engine {
    pub fn new(files: Arc<dyn FileAccessor>) -> Self {
        Engine {
            files,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Run `program` from a fresh record until it suspends or terminates.
    pub fn execute(&self, program: &Program) -> ExecutionRecord {
        self.run(program, ExecutionRecord::new())
    }

    /// Run a `Ready` record (e.g. one loaded from storage) from its `pc`.
    pub fn start(
        &self,
        program: &Program,
        record: ExecutionRecord,
    ) -> Result<ExecutionRecord, ResumeError> {
        if record.status != ExecutionStatus::Ready {
            return Err(ResumeError::NotReady(record.status));
        }
        Ok(self.run(program, record))
    }

    /// Continue a suspended record. The answer becomes the result of the
    /// pending `CC`; arrays and objects in it are allocated into the
    /// record's heap.
    pub fn resume(
        &self,
        program: &Program,
        mut record: ExecutionRecord,
        answer: &Json,
    ) -> Result<ExecutionRecord, ResumeError> {
        if record.status != ExecutionStatus::AwaitingInput {
            return Err(ResumeError::NotAwaitingInput(record.status));
        }
        match program.get(record.pc) {
            Some(instr) if instr.opcode == OpCode::Cc => {}
            _ => return Err(ResumeError::NotAtCognitiveCall(record.pc)),
        }
        let value = match json::from_json(&mut record.heap, answer) {
            Ok(value) => value,
            Err(e) => {
                record.fail(&VmError::from(e), record.pc, Some(OpCode::Cc));
                return Ok(record);
            }
        };
        record.push(value);
        record.pending_prompt = None;
        record.pc += 1;
        tracing::debug!(pc = record.pc, "resuming execution");
        Ok(self.run(program, record))
    }

    fn run(&self, program: &Program, mut record: ExecutionRecord) -> ExecutionRecord {
        record.status = ExecutionStatus::Running;

        while record.status == ExecutionStatus::Running {
            let pc = record.pc;
            let instr = match program.get(pc) {
                Some(instr) => instr,
                None if pc == program.len() => {
                    record.complete(None);
                    break;
                }
                None => {
                    let err = VmError::runtime(format!(
                        "pc {} outside program of {} instructions",
                        pc,
                        program.len()
                    ));
                    record.fail(&err, pc, None);
                    break;
                }
            };

            if let Some(limit) = self.options.instruction_limit {
                if record.steps >= limit {
                    let err =
                        VmError::runtime(format!("instruction limit of {} exceeded", limit));
                    record.fail(&err, pc, Some(instr.opcode));
                    break;
                }
            }
            record.steps += 1;
            tracing::trace!(pc, opcode = %instr.opcode, depth = record.stack.len(), "step");

            match self.step_instruction(&mut record, instr) {
                Ok(Flow::Next) => record.pc += 1,
                Ok(Flow::Jump(target)) if target > program.len() => {
                    let err = VmError::runtime(format!(
                        "jump target {} outside program of {} instructions",
                        target,
                        program.len()
                    ));
                    record.fail(&err, pc, Some(instr.opcode));
                }
                Ok(Flow::Jump(target)) => record.pc = target,
                Ok(Flow::Suspend(prompt)) => record.suspend(prompt),
                Ok(Flow::Complete(value)) => record.complete(value),
                Err(err) => record.fail(&err, pc, Some(instr.opcode)),
            }
        }

        match record.status {
            ExecutionStatus::AwaitingInput => {
                tracing::info!(pc = record.pc, steps = record.steps, "execution awaiting input")
            }
            ExecutionStatus::Completed => {
                tracing::info!(steps = record.steps, "execution completed")
            }
            ExecutionStatus::Failed => {
                if let Some(err) = &record.last_error {
                    tracing::warn!(error = %err, "execution failed");
                }
            }
            ExecutionStatus::Ready | ExecutionStatus::Running => {}
        }
        record
    }

    /// Execute one instruction against `record` without touching `pc` or
    /// the status. Checks the declared stack arity before dispatching.
    pub fn step_instruction(
        &self,
        record: &mut ExecutionRecord,
        instr: &Instruction,
    ) -> Result<Flow, VmError> {
        let spec = instr.opcode.spec();
        if record.stack.len() < spec.stack_in {
            return Err(VmError::StackUnderflow);
        }
        self.dispatch(record, instr)
    }
}
