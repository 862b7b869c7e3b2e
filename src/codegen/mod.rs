//! Code generation interface
//!
//! Write-slot routines are described through [`CodegenBackend`], a small
//! capability interface modelled on an LLVM builder: declare a function,
//! add blocks, access struct fields, emit constants and calls, then finalize
//! the function into a callable [`WriteSlotFn`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   TextConverter::codegen_write_slot          │
//! └──────────────────────┬───────────────────────┘
//!                        │ CodegenBackend
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │   SlotCodegen (builds ir::Module)            │
//! └───────────┬─────────────────────┬────────────┘
//!             │ Compiled            │ Interpreted
//!      ┌──────┴──────┐       ┌──────┴──────┐
//!      │ stencil     │       │ interp      │
//!      │ (patched)   │       │ (IR walk)   │
//!      └─────────────┘       └─────────────┘
//! ```

pub mod builder;

pub use builder::{CodegenStats, SlotCodegen};

use crate::compile::{CompileError, WriteSlotFn};
use crate::descriptor::SlotId;
use crate::ir::{BlockId, Callee, Constant, FunctionId, StructType, TypeId, Value};
use crate::string_parser::ParseFn;
use crate::types::PrimitiveType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or finalizing generated code
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodegenError {
    #[error("Invalid tuple layout: {0}")]
    InvalidLayout(String),

    #[error("Slot {0} is not nullable")]
    NotNullable(SlotId),

    #[error("No generated code for slot type {0}")]
    UnsupportedType(PrimitiveType),

    #[error("Escaped string slots need a copy step and cannot be generated")]
    EscapedString,

    #[error("No insert point has been set")]
    NoInsertPoint,

    #[error("Block '{0}' already has a terminator")]
    BlockTerminated(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unknown function {0:?}")]
    UnknownFunction(FunctionId),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// How finalized functions are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Lower to a patched stencil
    #[default]
    Compiled,
    /// Walk the IR on every call
    Interpreted,
}

/// A typed, named function parameter or local
#[derive(Debug, Clone, PartialEq)]
pub struct NamedVariable {
    pub name: String,
    pub ty: TypeId,
}

impl NamedVariable {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Signature of a function about to be declared
#[derive(Debug, Clone, PartialEq)]
pub struct FnPrototype {
    pub name: String,
    pub ret: TypeId,
    pub args: Vec<NamedVariable>,
}

impl FnPrototype {
    pub fn new(name: impl Into<String>, ret: TypeId) -> Self {
        Self {
            name: name.into(),
            ret,
            args: Vec::new(),
        }
    }

    pub fn add_argument(&mut self, arg: NamedVariable) {
        self.args.push(arg);
    }
}

/// Capability interface used by the generators.
///
/// Instruction-emitting methods append at the current insert point.
pub trait CodegenBackend {
    /// Type used to store a slot of `ty`
    fn get_type(&self, ty: PrimitiveType) -> TypeId;

    fn ptr_type(&mut self, pointee: TypeId) -> TypeId;

    fn declare_struct(&mut self, st: StructType) -> Result<TypeId, CodegenError>;

    /// Declare a function and return it with one value per argument
    fn declare_function(
        &mut self,
        prototype: &FnPrototype,
    ) -> Result<(FunctionId, Vec<Value>), CodegenError>;

    /// Add a pair of empty blocks to `func`
    fn create_if_else_blocks(
        &mut self,
        func: FunctionId,
        if_name: &str,
        else_name: &str,
    ) -> Result<(BlockId, BlockId), CodegenError>;

    /// Stack slot placed at the top of `func`'s entry block
    fn create_entry_block_alloca(
        &mut self,
        func: FunctionId,
        var: &NamedVariable,
    ) -> Result<Value, CodegenError>;

    fn set_insert_point(&mut self, func: FunctionId, block: BlockId);

    fn icmp_eq(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError>;

    fn or(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError>;

    fn and(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError>;

    fn cond_br(
        &mut self,
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> Result<(), CodegenError>;

    /// Pointer to field `index` of the struct `base` points at
    fn struct_gep(&mut self, base: Value, index: u32, name: &str) -> Result<Value, CodegenError>;

    fn load(&mut self, ptr: Value, name: &str) -> Result<Value, CodegenError>;

    fn store(&mut self, value: Value, ptr: Value) -> Result<(), CodegenError>;

    fn call(&mut self, callee: Callee, args: &[Value], name: &str) -> Result<Value, CodegenError>;

    fn ret(&mut self, value: Option<Value>) -> Result<(), CodegenError>;

    /// Turn a completed function into a callable routine
    fn finalize_function(&mut self, func: FunctionId) -> Result<WriteSlotFn, CodegenError>;

    fn get_parse_function(&self, parse_fn: ParseFn) -> Callee {
        Callee::Parse(parse_fn)
    }

    fn int_constant(&self, ty: TypeId, value: i64) -> Value {
        Value::Const(Constant::Int { ty, value })
    }

    fn true_value(&self) -> Value {
        Value::Const(Constant::Bool(true))
    }

    fn false_value(&self) -> Value {
        Value::Const(Constant::Bool(false))
    }
}
