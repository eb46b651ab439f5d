//! cogvm Core
//!
//! Shared types used across the VM, the runtime services and the CLI: the
//! bytecode instruction set, runtime values, and the handle-addressed heap.

pub mod heap;
pub mod isa;
pub mod json;
pub mod values;

pub use heap::{Heap, HeapEntry, HeapError, HeapKind};
pub use isa::{Instruction, OpCode, OpSpec, Operand, OperandKind, Program};
pub use values::{Handle, Value};
