//! Session orchestration over a durable store.
//!
//! The store is the single source of truth: every operation loads the
//! execution it touches, advances it with the [`Engine`], and persists the
//! result before answering. Nothing about an execution is cached between
//! calls, so any process with access to the store can pick a session up.

use crate::assembler::{Assembler, CompileError, Compiler};
use crate::snapshot::{ExecutionSnapshot, SnapshotError};
use crate::vm::{Engine, ExecutionRecord, ExecutionStatus, ResumeError};
use chrono::{DateTime, Utc};
use cogvm_core::isa::Program;
use cogvm_core::json;
use cogvm_runtime::store::{DurableStore, RecordKind, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("program not found: {0}")]
    ProgramNotFound(String),
    #[error("program {0} has no bytecode: compilation failed")]
    ProgramNotCompiled(String),
    #[error("compilation failed: {}", summarize(.0))]
    Compile(Vec<CompileError>),
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("execution already exists: {0}")]
    ExecutionExists(String),
    #[error("execution {id} is not awaiting input (status: {status})")]
    NotAwaitingInput { id: String, status: ExecutionStatus },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("record encoding failed: {0}")]
    Encoding(String),
    #[error("execution {id} does not match its program: {message}")]
    Inconsistent { id: String, message: String },
}

fn summarize(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub id: String,
    pub source: String,
    pub source_sha256: String,
    pub created_at: DateTime<Utc>,
    /// `None` when compilation failed; `diagnostics` says why.
    pub bytecode: Option<Program>,
    #[serde(default)]
    pub diagnostics: Vec<CompileError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredExecution {
    pub execution_id: String,
    pub program_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ExecutionSnapshot,
}

impl StoredExecution {
    pub fn status(&self) -> ExecutionStatus {
        self.state.status
    }
}

/// What a caller sees after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { result: Json, output: Vec<String> },
    AwaitingInput { prompt: String },
    Failed { message: String },
}

pub fn source_digest(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SessionOrchestrator {
    store: Arc<dyn DurableStore>,
    compiler: Arc<dyn Compiler>,
    engine: Engine,
}

impl SessionOrchestrator {
    pub fn new(store: Arc<dyn DurableStore>, engine: Engine) -> Self {
        SessionOrchestrator {
            store,
            compiler: Arc::new(Assembler),
            engine,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile and persist a program. A failed compilation is persisted
    /// too (with its diagnostics) so later starts report it precisely.
    pub fn load_program(
        &self,
        program_id: &str,
        source: &str,
    ) -> Result<ProgramRecord, SessionError> {
        let (bytecode, diagnostics) = match self.compiler.compile(source) {
            Ok(program) => (Some(program), Vec::new()),
            Err(errors) => (None, errors),
        };
        let record = ProgramRecord {
            id: program_id.to_string(),
            source: source.to_string(),
            source_sha256: source_digest(source),
            created_at: Utc::now(),
            bytecode,
            diagnostics,
        };
        self.save(RecordKind::Program, program_id, &record)?;

        if record.bytecode.is_none() {
            tracing::warn!(
                program_id,
                errors = record.diagnostics.len(),
                "program failed to compile"
            );
            return Err(SessionError::Compile(record.diagnostics));
        }
        tracing::info!(program_id, sha256 = %record.source_sha256, "program loaded");
        Ok(record)
    }

    pub fn program(&self, program_id: &str) -> Result<ProgramRecord, SessionError> {
        self.load(RecordKind::Program, program_id)?
            .ok_or_else(|| SessionError::ProgramNotFound(program_id.to_string()))
    }

    pub fn list_programs(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.store.list(RecordKind::Program)?)
    }

    /// Create a `Ready` execution of a compiled program. Nothing runs
    /// until [`get_next`](Self::get_next).
    pub fn start_execution(
        &self,
        program_id: &str,
        execution_id: &str,
    ) -> Result<StoredExecution, SessionError> {
        self.bytecode(program_id)?;
        if self.store.load(RecordKind::Execution, execution_id)?.is_some() {
            return Err(SessionError::ExecutionExists(execution_id.to_string()));
        }
        let now = Utc::now();
        let stored = StoredExecution {
            execution_id: execution_id.to_string(),
            program_id: program_id.to_string(),
            created_at: now,
            updated_at: now,
            state: ExecutionSnapshot::capture(&ExecutionRecord::new()),
        };
        self.save(RecordKind::Execution, execution_id, &stored)?;
        tracing::info!(program_id, execution_id, "execution created");
        Ok(stored)
    }

    /// Run a `Ready` execution until it suspends or terminates. For a
    /// suspended or finished execution this re-reports where it stands.
    pub fn get_next(&self, execution_id: &str) -> Result<StepOutcome, SessionError> {
        let mut stored = self.execution(execution_id)?;
        match stored.state.status {
            ExecutionStatus::Ready => {
                let program = self.bytecode(&stored.program_id)?;
                let record = stored.state.restore_for(&program)?;
                let record = self
                    .engine
                    .start(&program, record)
                    .map_err(|e| inconsistent(execution_id, e))?;
                self.commit(&mut stored, &record)?;
                outcome(&record)
            }
            ExecutionStatus::Running => Err(SessionError::Inconsistent {
                id: execution_id.to_string(),
                message: "persisted while running".into(),
            }),
            _ => outcome(&stored.state.restore()?),
        }
    }

    /// Supply the answer to the pending cognitive call and run on to the
    /// next suspension or the end.
    pub fn submit_answer(
        &self,
        execution_id: &str,
        answer: &Json,
    ) -> Result<StepOutcome, SessionError> {
        let mut stored = self.execution(execution_id)?;
        if stored.state.status != ExecutionStatus::AwaitingInput {
            return Err(SessionError::NotAwaitingInput {
                id: execution_id.to_string(),
                status: stored.state.status,
            });
        }
        let program = self.bytecode(&stored.program_id)?;
        let record = stored.state.restore_for(&program)?;
        let record = self
            .engine
            .resume(&program, record, answer)
            .map_err(|e| match e {
                ResumeError::NotAwaitingInput(status) => SessionError::NotAwaitingInput {
                    id: execution_id.to_string(),
                    status,
                },
                other => inconsistent(execution_id, other),
            })?;
        self.commit(&mut stored, &record)?;
        tracing::info!(execution_id, status = %record.status, "answer applied");
        outcome(&record)
    }

    /// Delete a persisted execution. This is the only way to cancel one.
    pub fn cancel_execution(&self, execution_id: &str) -> Result<(), SessionError> {
        if !self.store.delete(RecordKind::Execution, execution_id)? {
            return Err(SessionError::ExecutionNotFound(execution_id.to_string()));
        }
        tracing::info!(execution_id, "execution cancelled");
        Ok(())
    }

    /// Copy an execution under a new id; both then evolve independently.
    pub fn fork_execution(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<StoredExecution, SessionError> {
        let source = self.execution(source_id)?;
        if self.store.load(RecordKind::Execution, target_id)?.is_some() {
            return Err(SessionError::ExecutionExists(target_id.to_string()));
        }
        let now = Utc::now();
        let fork = StoredExecution {
            execution_id: target_id.to_string(),
            created_at: now,
            updated_at: now,
            ..source
        };
        self.save(RecordKind::Execution, target_id, &fork)?;
        tracing::info!(source_id, target_id, "execution forked");
        Ok(fork)
    }

    pub fn inspect_execution(&self, execution_id: &str) -> Result<StoredExecution, SessionError> {
        self.execution(execution_id)
    }

    pub fn list_executions(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.store.list(RecordKind::Execution)?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn bytecode(&self, program_id: &str) -> Result<Program, SessionError> {
        self.program(program_id)?
            .bytecode
            .ok_or_else(|| SessionError::ProgramNotCompiled(program_id.to_string()))
    }

    fn execution(&self, execution_id: &str) -> Result<StoredExecution, SessionError> {
        self.load(RecordKind::Execution, execution_id)?
            .ok_or_else(|| SessionError::ExecutionNotFound(execution_id.to_string()))
    }

    fn commit(
        &self,
        stored: &mut StoredExecution,
        record: &ExecutionRecord,
    ) -> Result<(), SessionError> {
        stored.state = ExecutionSnapshot::capture(record);
        stored.updated_at = Utc::now();
        let id = stored.execution_id.clone();
        self.save(RecordKind::Execution, &id, stored)
    }

    fn save<T: Serialize>(&self, kind: RecordKind, id: &str, value: &T) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(value).map_err(|e| SessionError::Encoding(e.to_string()))?;
        self.store.save(kind, id, &bytes)?;
        Ok(())
    }

    fn load<T: for<'de> Deserialize<'de>>(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<T>, SessionError> {
        match self.store.load(kind, id)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SessionError::Encoding(format!("{} {}: {}", kind_label(kind), id, e))),
            None => Ok(None),
        }
    }
}

fn kind_label(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Program => "program",
        RecordKind::Execution => "execution",
    }
}

fn inconsistent(id: &str, err: ResumeError) -> SessionError {
    SessionError::Inconsistent {
        id: id.to_string(),
        message: err.to_string(),
    }
}

fn outcome(record: &ExecutionRecord) -> Result<StepOutcome, SessionError> {
    Ok(match record.status {
        ExecutionStatus::Completed => {
            let result = match &record.return_value {
                Some(value) => json::to_json(&record.heap, value)
                    .map_err(|e| SessionError::Encoding(format!("return value: {}", e)))?
                    .unwrap_or(Json::Null),
                None => Json::Null,
            };
            StepOutcome::Completed {
                result,
                output: record.output.clone(),
            }
        }
        ExecutionStatus::AwaitingInput => StepOutcome::AwaitingInput {
            prompt: record.pending_prompt.clone().unwrap_or_default(),
        },
        ExecutionStatus::Failed => StepOutcome::Failed {
            message: record
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "execution failed".to_string()),
        },
        ExecutionStatus::Ready | ExecutionStatus::Running => {
            return Err(SessionError::Encoding(format!(
                "execution left in {} state",
                record.status
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogvm_runtime::store::MemoryStore;
    use serde_json::json;

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator::new(Arc::new(MemoryStore::new()), Engine::default())
    }

    const ASK_TWICE: &str = r#"
        PUSH "first?"
        CC
        STORE a
        PUSH "second?"
        CC
        LOAD a
        ADD
        RETURN
    "#;

    #[test]
    fn full_session_flow() {
        let orch = orchestrator();
        orch.load_program("sum", ASK_TWICE).unwrap();
        orch.start_execution("sum", "run-1").unwrap();

        assert_eq!(
            orch.inspect_execution("run-1").unwrap().status(),
            ExecutionStatus::Ready
        );
        assert_eq!(
            orch.get_next("run-1").unwrap(),
            StepOutcome::AwaitingInput {
                prompt: "first?".into()
            }
        );
        // Re-asking does not advance.
        assert_eq!(
            orch.get_next("run-1").unwrap(),
            StepOutcome::AwaitingInput {
                prompt: "first?".into()
            }
        );
        assert_eq!(
            orch.submit_answer("run-1", &json!(2)).unwrap(),
            StepOutcome::AwaitingInput {
                prompt: "second?".into()
            }
        );
        let done = orch.submit_answer("run-1", &json!(40)).unwrap();
        assert_eq!(
            done,
            StepOutcome::Completed {
                result: json!(42),
                output: vec![]
            }
        );
        assert_eq!(orch.get_next("run-1").unwrap(), done);
    }

    #[test]
    fn compile_failures_are_loud() {
        let orch = orchestrator();
        assert!(matches!(
            orch.load_program("bad", "FROB"),
            Err(SessionError::Compile(errors)) if errors.len() == 1
        ));
        assert!(matches!(
            orch.start_execution("bad", "r"),
            Err(SessionError::ProgramNotCompiled(_))
        ));
        assert!(matches!(
            orch.start_execution("missing", "r"),
            Err(SessionError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn answers_only_go_to_suspended_executions() {
        let orch = orchestrator();
        orch.load_program("p", "HALT").unwrap();
        orch.start_execution("p", "r").unwrap();
        assert!(matches!(
            orch.submit_answer("r", &json!("x")),
            Err(SessionError::NotAwaitingInput {
                status: ExecutionStatus::Ready,
                ..
            })
        ));
        orch.get_next("r").unwrap();
        assert!(matches!(
            orch.submit_answer("r", &json!("x")),
            Err(SessionError::NotAwaitingInput {
                status: ExecutionStatus::Completed,
                ..
            })
        ));
        assert!(matches!(
            orch.submit_answer("nope", &json!("x")),
            Err(SessionError::ExecutionNotFound(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let orch = orchestrator();
        orch.load_program("p", "HALT").unwrap();
        orch.start_execution("p", "r").unwrap();
        assert!(matches!(
            orch.start_execution("p", "r"),
            Err(SessionError::ExecutionExists(_))
        ));
    }

    #[test]
    fn fork_explores_alternatives() {
        let orch = orchestrator();
        orch.load_program("echo", "PUSH \"say?\"\nCC\nRETURN").unwrap();
        orch.start_execution("echo", "base").unwrap();
        orch.get_next("base").unwrap();
        orch.fork_execution("base", "alt").unwrap();

        let a = orch.submit_answer("base", &json!("yes")).unwrap();
        let b = orch.submit_answer("alt", &json!(["no", 1])).unwrap();
        assert_eq!(
            a,
            StepOutcome::Completed {
                result: json!("yes"),
                output: vec![]
            }
        );
        assert_eq!(
            b,
            StepOutcome::Completed {
                result: json!(["no", 1]),
                output: vec![]
            }
        );
        assert_eq!(orch.list_executions().unwrap(), vec!["alt", "base"]);
    }

    #[test]
    fn cancel_deletes_the_record() {
        let orch = orchestrator();
        orch.load_program("p", "PUSH \"q\"\nCC").unwrap();
        orch.start_execution("p", "r").unwrap();
        orch.get_next("r").unwrap();
        orch.cancel_execution("r").unwrap();
        assert!(matches!(
            orch.get_next("r"),
            Err(SessionError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            orch.cancel_execution("r"),
            Err(SessionError::ExecutionNotFound(_))
        ));
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let orch = orchestrator();
        orch.load_program("p", "PUSH 1\nPUSH 0\nDIV").unwrap();
        orch.start_execution("p", "r").unwrap();
        match orch.get_next("r").unwrap() {
            StepOutcome::Failed { message } => {
                assert_eq!(message, "DivisionByZero at pc 2 (DIV): division by zero")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn program_records_carry_a_digest() {
        let orch = orchestrator();
        let record = orch.load_program("p", "HALT").unwrap();
        assert_eq!(record.source_sha256.len(), 64);
        assert_eq!(record.source_sha256, source_digest("HALT"));
        assert_eq!(orch.program("p").unwrap(), record);
    }
}
