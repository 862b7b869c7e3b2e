//! Copy-and-patch compilation engine
//!
//! Recognises the write-slot shape in a verified IR function, pulls the slot
//! offset and null bit out of it, and patches them into the matching
//! precompiled stencil. Anything that does not match a known shape is
//! refused rather than approximated.

use crate::interp::{Interpreter, RtValue};
use crate::ir::{
    verify_function, BlockId, Callee, Constant, Function, FunctionId, Inst, Module, TypeId,
    Value, VerifyError,
};
use crate::stencil::{NullPatch, Operands, StencilFn, StencilKind, StencilTable, STENCILS};
use crate::string_parser::{ParseFn, ParseResult};
use crate::tuple::TupleBuffer;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("Function '{0}' is not (tuple*, i8*, usize) -> i1")]
    SignatureMismatch(String),
    #[error("Function '{0}' does not have a recognised shape: {1}")]
    UnrecognizedShape(String, String),
    #[error("No stencil stores {0:?} into a slot of type {1}")]
    MissingStencil(ParseFn, String),
}

enum RoutineImpl {
    Stencil {
        func: StencilFn,
        operands: Operands,
    },
    Interpreted {
        module: Arc<Module>,
        function: FunctionId,
    },
}

/// A finalized write-slot routine.
///
/// `(tuple, data, len) -> bool`: an empty field marks the slot null and
/// succeeds; a field that fails to parse marks the slot null and fails.
/// String slots alias `data`, so the tuple must not outlive it.
pub struct WriteSlotFn {
    name: String,
    tuple_size: usize,
    imp: RoutineImpl,
}

impl WriteSlotFn {
    pub(crate) fn stencil(name: String, tuple_size: usize, func: StencilFn, operands: Operands) -> Self {
        Self {
            name,
            tuple_size,
            imp: RoutineImpl::Stencil { func, operands },
        }
    }

    pub(crate) fn interpreted(
        name: String,
        tuple_size: usize,
        module: Arc<Module>,
        function: FunctionId,
    ) -> Self {
        Self {
            name,
            tuple_size,
            imp: RoutineImpl::Interpreted { module, function },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes of tuple memory the routine may touch
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.imp, RoutineImpl::Stencil { .. })
    }

    /// Patched operands, for compiled routines
    pub fn operands(&self) -> Option<Operands> {
        match &self.imp {
            RoutineImpl::Stencil { operands, .. } => Some(*operands),
            RoutineImpl::Interpreted { .. } => None,
        }
    }

    /// The routine's own IR, for interpreted routines
    pub fn module(&self) -> Option<&Module> {
        match &self.imp {
            RoutineImpl::Stencil { .. } => None,
            RoutineImpl::Interpreted { module, .. } => Some(module),
        }
    }

    /// Run the routine on raw memory.
    ///
    /// # Safety
    /// `tuple` must point to at least [`tuple_size`](Self::tuple_size)
    /// writable bytes and `data` to `len` readable bytes.
    pub unsafe fn call(&self, tuple: *mut u8, data: *const u8, len: usize) -> bool {
        match &self.imp {
            RoutineImpl::Stencil { func, operands } => func(operands, tuple, data, len),
            RoutineImpl::Interpreted { module, function } => {
                let args = [
                    RtValue::Ptr(tuple),
                    RtValue::Ptr(data as *mut u8),
                    RtValue::Int(len as i64),
                ];
                match Interpreter::new(module).run(*function, &args) {
                    Ok(RtValue::Bool(ok)) => ok,
                    Ok(other) => {
                        error!(function = %self.name, result = ?other, "write-slot routine returned a non-boolean");
                        false
                    }
                    Err(e) => {
                        error!(function = %self.name, error = %e, "write-slot routine failed");
                        false
                    }
                }
            }
        }
    }

    /// Run the routine against an owned tuple.
    ///
    /// String slots keep a pointer into `data`; reading them after `data`
    /// is gone is undefined.
    pub fn write(&self, tuple: &mut TupleBuffer, data: &[u8]) -> bool {
        assert!(
            tuple.len() >= self.tuple_size,
            "tuple of {} bytes is smaller than the {} bytes {} writes",
            tuple.len(),
            self.tuple_size,
            self.name
        );
        unsafe { self.call(tuple.as_mut_ptr(), data.as_ptr(), data.len()) }
    }
}

impl fmt::Debug for WriteSlotFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSlotFn")
            .field("name", &self.name)
            .field("tuple_size", &self.tuple_size)
            .field("compiled", &self.is_compiled())
            .field("operands", &self.operands())
            .finish()
    }
}

/// Check the `(tuple*, i8*, usize) -> i1` signature and return the size of
/// the tuple struct
pub fn check_write_slot_signature(module: &Module, id: FunctionId) -> Result<usize, CompileError> {
    let func = module
        .function(id)
        .ok_or(CompileError::Verify(VerifyError::UnknownFunction(id)))?;
    let mismatch = || CompileError::SignatureMismatch(func.name.clone());
    if func.ret != TypeId::BOOL || func.params.len() != 3 {
        return Err(mismatch());
    }
    if func.params[1].ty != TypeId::BYTES || func.params[2].ty != TypeId::USIZE {
        return Err(mismatch());
    }
    module
        .types
        .pointee(func.params[0].ty)
        .and_then(|t| module.types.struct_type(t))
        .map(|st| st.size)
        .ok_or_else(mismatch)
}

/// Copy-and-patch compiler
pub struct Compiler {
    stencils: &'static StencilTable,
    compiled: AtomicU64,
    rejected: AtomicU64,
    compile_time_ns: AtomicU64,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            stencils: &STENCILS,
            compiled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            compile_time_ns: AtomicU64::new(0),
        }
    }

    /// Lower `id` to a patched stencil
    pub fn compile(&self, module: &Module, id: FunctionId) -> Result<WriteSlotFn, CompileError> {
        let start = Instant::now();
        let result = self.lower(module, id);
        self.compile_time_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        match &result {
            Ok(_) => self.compiled.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn lower(&self, module: &Module, id: FunctionId) -> Result<WriteSlotFn, CompileError> {
        verify_function(module, id)?;
        let tuple_size = check_write_slot_signature(module, id)?;
        let func = module
            .function(id)
            .ok_or(CompileError::Verify(VerifyError::UnknownFunction(id)))?;
        let shape = ShapeMatcher { module, func };

        let (null_block, parse_block) = shape.entry_branch()?;
        let null = shape.null_block(null_block)?;
        let (slot_offset, kind) = shape.parse_block(parse_block, null)?;

        let entry = self.stencils.get(kind);
        Ok(WriteSlotFn::stencil(
            func.name.clone(),
            tuple_size,
            entry.func,
            Operands { slot_offset, null },
        ))
    }

    pub fn stats(&self) -> CompilerStats {
        CompilerStats {
            compiled: self.compiled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            compile_time_ns: self.compile_time_ns.load(Ordering::Relaxed),
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerStats {
    pub compiled: u64,
    pub rejected: u64,
    pub compile_time_ns: u64,
}

/// Walks a verified write-slot function
struct ShapeMatcher<'a> {
    module: &'a Module,
    func: &'a Function,
}

impl<'a> ShapeMatcher<'a> {
    fn fail(&self, what: &str) -> CompileError {
        CompileError::UnrecognizedShape(self.func.name.clone(), what.to_string())
    }

    fn def(&self, value: &Value) -> Option<&'a Inst> {
        let func: &'a Function = self.func;
        match value {
            Value::Inst(id) => Some(&func.inst(*id).inst),
            _ => None,
        }
    }

    fn insts(&self, block: BlockId) -> Vec<&'a Inst> {
        let func: &'a Function = self.func;
        func.block_insts(block).map(|d| &d.inst).collect()
    }

    /// `br (len == 0), null, parse`
    fn entry_branch(&self) -> Result<(BlockId, BlockId), CompileError> {
        let Some(Inst::CondBr {
            cond,
            then_dest,
            else_dest,
        }) = self.func.terminator(BlockId::ENTRY)
        else {
            return Err(self.fail("entry block does not branch"));
        };
        let zero = Value::Const(Constant::Int {
            ty: TypeId::USIZE,
            value: 0,
        });
        match self.def(cond) {
            Some(Inst::ICmpEq { lhs, rhs })
                if (*lhs == Value::Arg(2) && *rhs == zero)
                    || (*lhs == zero && *rhs == Value::Arg(2)) =>
            {
                Ok((*then_dest, *else_dest))
            }
            _ => Err(self.fail("entry branch does not test for an empty field")),
        }
    }

    /// `call SetNull(tuple); ret <value>`
    fn null_call_then_ret(&self, block: BlockId, ret: bool) -> Result<NullPatch, CompileError> {
        let insts = self.insts(block);
        let expected_ret = Inst::Ret {
            value: Some(Value::Const(Constant::Bool(ret))),
        };
        match insts.as_slice() {
            [Inst::Call {
                callee: Callee::Function(target),
                args,
            }, last]
                if args.as_slice() == [Value::Arg(0)] && **last == expected_ret =>
            {
                self.set_null_patch(*target)
            }
            _ => Err(self.fail("null block does not call a null-marking function")),
        }
    }

    fn null_block(&self, block: BlockId) -> Result<NullPatch, CompileError> {
        self.null_call_then_ret(block, true)
    }

    /// Recover the null bit from
    /// `gep tuple, k; load; or mask; store; ret void`
    fn set_null_patch(&self, id: FunctionId) -> Result<NullPatch, CompileError> {
        let callee = self
            .module
            .function(id)
            .ok_or_else(|| self.fail("null-marking function is missing"))?;
        let insts: Vec<&Inst> = callee.block_insts(BlockId::ENTRY).map(|d| &d.inst).collect();
        let bad = || self.fail("null-marking function has an unexpected body");
        if callee.blocks.len() != 1 || insts.len() != 5 {
            return Err(bad());
        }
        let gep = Value::Inst(callee.block(BlockId::ENTRY).insts[0]);
        let load = Value::Inst(callee.block(BlockId::ENTRY).insts[1]);
        let or = Value::Inst(callee.block(BlockId::ENTRY).insts[2]);
        let field = match insts[0] {
            Inst::StructGep {
                base: Value::Arg(0),
                index,
            } => *index,
            _ => return Err(bad()),
        };
        let mask = match (insts[1], insts[2], insts[3], insts[4]) {
            (
                Inst::Load { ptr: p },
                Inst::Or {
                    lhs,
                    rhs: Value::Const(Constant::Int { value, .. }),
                },
                Inst::Store { value: v, ptr: sp },
                Inst::Ret { value: None },
            ) if *p == gep && *lhs == load && *v == or && *sp == gep => *value as u8,
            _ => return Err(bad()),
        };
        let byte_offset = callee
            .params
            .first()
            .and_then(|p| self.module.types.pointee(p.ty))
            .and_then(|t| self.module.types.struct_type(t))
            .and_then(|st| st.fields.get(field as usize))
            .filter(|f| f.ty == TypeId::I8)
            .map(|f| f.offset)
            .ok_or_else(bad)?;
        if mask == 0 {
            return Err(bad());
        }
        Ok(NullPatch { byte_offset, mask })
    }

    /// Slot field offset and type for `gep tuple, k`
    fn slot_field(&self, gep: &Inst) -> Option<(usize, TypeId)> {
        let Inst::StructGep {
            base: Value::Arg(0),
            index,
        } = gep
        else {
            return None;
        };
        let tuple_ty = self.module.types.pointee(self.func.params[0].ty)?;
        let field = self.module.types.struct_type(tuple_ty)?.fields.get(*index as usize)?;
        Some((field.offset, field.ty))
    }

    fn parse_block(
        &self,
        block: BlockId,
        null: NullPatch,
    ) -> Result<(usize, StencilKind), CompileError> {
        let ids = &self.func.block(block).insts;
        let first = ids
            .first()
            .map(|id| &self.func.inst(*id).inst)
            .ok_or_else(|| self.fail("parse block is empty"))?;
        let (slot_offset, slot_ty) = self
            .slot_field(first)
            .ok_or_else(|| self.fail("parse block does not address a slot"))?;
        let slot_ptr = Value::Inst(ids[0]);

        match self.func.terminator(block) {
            Some(Inst::Ret { value: Some(Value::Const(Constant::Bool(true))) }) => {
                self.string_store(block, slot_ptr, slot_ty)?;
                Ok((slot_offset, StencilKind::String))
            }
            Some(Inst::CondBr {
                cond,
                then_dest,
                else_dest,
            }) => {
                let parse_fn = self.parse_and_test(block, cond)?;
                if self.null_call_then_ret(*then_dest, false)? != null {
                    return Err(self.fail("parse failure marks a different null bit"));
                }
                let parsed = self.parse_call_value(block)?;
                self.scalar_store(*else_dest, parsed, slot_ptr)?;
                if parse_fn.result_type() != slot_ty {
                    return Err(CompileError::MissingStencil(
                        parse_fn,
                        self.module.types.name(slot_ty),
                    ));
                }
                Ok((slot_offset, StencilKind::for_parser(parse_fn)))
            }
            _ => Err(self.fail("parse block has an unexpected terminator")),
        }
    }

    /// `store data, gep slot, 0; store len, gep slot, 1`
    fn string_store(&self, block: BlockId, slot_ptr: Value, slot_ty: TypeId) -> Result<(), CompileError> {
        if slot_ty != TypeId::STRING_VALUE {
            return Err(self.fail("string store into a non-string slot"));
        }
        let stored_into = |arg: u32, field: u32| {
            self.insts(block).into_iter().any(|inst| match inst {
                Inst::Store { value, ptr } if *value == Value::Arg(arg) => matches!(
                    self.def(ptr),
                    Some(Inst::StructGep { base, index }) if *base == slot_ptr && *index == field
                ),
                _ => false,
            })
        };
        if stored_into(1, 0) && stored_into(2, 1) {
            Ok(())
        } else {
            Err(self.fail("string slot is not set from (data, len)"))
        }
    }

    /// `%v = call parse(data, len, %status); %s = load %status;
    /// br (%s == FAILURE), fail, success`
    fn parse_and_test(&self, block: BlockId, cond: &Value) -> Result<ParseFn, CompileError> {
        let failure = ParseResult::Failure as i64;
        let status_ptr = match self.def(cond) {
            Some(Inst::ICmpEq { lhs, rhs }) => {
                let (loaded, constant) = match (lhs, rhs) {
                    (v, Value::Const(Constant::Int { value, .. })) => (v, *value),
                    (Value::Const(Constant::Int { value, .. }), v) => (v, *value),
                    _ => return Err(self.fail("parse status is not compared to a constant")),
                };
                if constant != failure {
                    return Err(self.fail("parse status is not compared to FAILURE"));
                }
                match self.def(loaded) {
                    Some(Inst::Load { ptr }) => *ptr,
                    _ => return Err(self.fail("parse status is not loaded")),
                }
            }
            _ => return Err(self.fail("parse branch is not a comparison")),
        };
        self.insts(block)
            .into_iter()
            .find_map(|inst| match inst {
                Inst::Call {
                    callee: Callee::Parse(parse_fn),
                    args,
                } if args.as_slice() == [Value::Arg(1), Value::Arg(2), status_ptr] => {
                    Some(*parse_fn)
                }
                _ => None,
            })
            .ok_or_else(|| self.fail("no parser call writes the tested status"))
    }

    fn parse_call_value(&self, block: BlockId) -> Result<Value, CompileError> {
        self.func
            .block(block)
            .insts
            .iter()
            .find(|id| {
                matches!(
                    self.func.inst(**id).inst,
                    Inst::Call {
                        callee: Callee::Parse(_),
                        ..
                    }
                )
            })
            .map(|id| Value::Inst(*id))
            .ok_or_else(|| self.fail("parse block has no parser call"))
    }

    /// `store %v, slot; ret true`
    fn scalar_store(&self, block: BlockId, parsed: Value, slot_ptr: Value) -> Result<(), CompileError> {
        let insts = self.insts(block);
        let ret_true = Inst::Ret {
            value: Some(Value::Const(Constant::Bool(true))),
        };
        match insts.as_slice() {
            [Inst::Store { value, ptr }, last]
                if *value == parsed && *ptr == slot_ptr && **last == ret_true =>
            {
                Ok(())
            }
            _ => Err(self.fail("parse success does not store the parsed value")),
        }
    }
}
