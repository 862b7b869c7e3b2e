//! IR (Intermediate Representation) module
//!
//! Write-slot routines are first built as IR through the
//! [`CodegenBackend`](crate::codegen::CodegenBackend) interface, then lowered
//! either to a patched stencil or to the interpreter.

pub mod extract;
pub mod format;
pub mod function;
pub mod types;
pub mod verify;

pub use format::FunctionDisplay;
pub use function::{
    Block, BlockId, Callee, Constant, Function, FunctionId, Inst, InstData, InstId, Module, Param,
    Value,
};
pub use types::{StructField, StructType, TypeId, TypeKind, TypeTable};
pub use verify::{verify_function, VerifyError};
