//! cogvm VM
//!
//! The execution engine, the serialized form of an execution, the session
//! orchestrator that parks and resumes executions through a durable store,
//! and the bytecode assembler.
#![warn(clippy::all)]

pub mod assembler;
pub mod session;
pub mod snapshot;
pub mod vm;

pub use assembler::{Assembler, CompileError, Compiler};
pub use session::{SessionError, SessionOrchestrator, StepOutcome};
pub use snapshot::{ExecutionSnapshot, SnapshotError};
pub use vm::{Engine, EngineOptions, ExecutionRecord, ExecutionStatus, ResumeError, VmError};
