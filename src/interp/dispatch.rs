//! IR interpreter
//!
//! Executes a [`Function`] directly against raw memory. Used when the
//! generator runs in [`ExecutionMode::Interpreted`](crate::codegen::ExecutionMode)
//! and in tests to check stencil output against the IR it was lowered from.

use crate::ir::{Callee, Constant, Function, FunctionId, Inst, Module, TypeId, TypeKind, Value};
use crate::string_parser::{ParseField, ParseFn, ParseResult};
use std::ptr;
use thiserror::Error;

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    Void,
    Bool(bool),
    /// Any integer type, sign-extended
    Int(i64),
    F32(f32),
    F64(f64),
    Ptr(*mut u8),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterpError {
    #[error("Unknown function {0:?}")]
    UnknownFunction(FunctionId),
    #[error("Value used before it was computed in '{0}'")]
    UndefinedValue(String),
    #[error("Type error in '{0}': {1}")]
    TypeError(String, String),
    #[error("Cannot load or store a value of type {0}")]
    UnsupportedType(String),
    #[error("Block in '{0}' fell through without a terminator")]
    FellThrough(String),
    #[error("Call depth exceeded")]
    CallDepthExceeded,
}

/// Maximum nested calls
const MAX_CALL_DEPTH: usize = 16;

/// Interpreter over one module
pub struct Interpreter<'m> {
    module: &'m Module,
}

/// Per-call state
struct Frame<'f> {
    func: &'f Function,
    args: &'f [RtValue],
    values: Vec<Option<RtValue>>,
    /// Backing memory for allocas
    stack: Vec<Box<[u64]>>,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Run `id` with `args`.
    ///
    /// # Safety
    /// Pointer arguments must be valid for every access the function makes.
    pub unsafe fn run(&self, id: FunctionId, args: &[RtValue]) -> Result<RtValue, InterpError> {
        self.run_at_depth(id, args, 0)
    }

    unsafe fn run_at_depth(
        &self,
        id: FunctionId,
        args: &[RtValue],
        depth: usize,
    ) -> Result<RtValue, InterpError> {
        if depth > MAX_CALL_DEPTH {
            return Err(InterpError::CallDepthExceeded);
        }
        let func = self
            .module
            .function(id)
            .ok_or(InterpError::UnknownFunction(id))?;
        if args.len() != func.params.len() {
            return Err(self.type_error(func, "wrong number of arguments"));
        }
        let mut frame = Frame {
            func,
            args,
            values: vec![None; func.insts.len()],
            stack: Vec::new(),
        };

        let mut block = crate::ir::BlockId::ENTRY;
        loop {
            let mut next = None;
            for inst_id in &func.block(block).insts {
                let data = func.inst(*inst_id);
                match &data.inst {
                    Inst::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        let taken = match frame.get(cond)? {
                            RtValue::Bool(b) => b,
                            _ => return Err(self.type_error(func, "branch on a non-boolean")),
                        };
                        next = Some(if taken { *then_dest } else { *else_dest });
                        break;
                    }
                    Inst::Ret { value } => {
                        return match value {
                            Some(v) => frame.get(v),
                            None => Ok(RtValue::Void),
                        };
                    }
                    inst => {
                        let result = self.step(&mut frame, inst, data.ty, depth)?;
                        frame.values[inst_id.index()] = Some(result);
                    }
                }
            }
            match next {
                Some(b) => block = b,
                None => return Err(InterpError::FellThrough(func.name.clone())),
            }
        }
    }

    fn type_error(&self, func: &Function, what: &str) -> InterpError {
        InterpError::TypeError(func.name.clone(), what.to_string())
    }

    unsafe fn step(
        &self,
        frame: &mut Frame<'_>,
        inst: &Inst,
        ty: TypeId,
        depth: usize,
    ) -> Result<RtValue, InterpError> {
        let func = frame.func;
        match inst {
            Inst::Alloca { ty: alloc_ty } => {
                let words = self.module.types.size_of(*alloc_ty).div_ceil(8).max(1);
                let mut mem = vec![0u64; words].into_boxed_slice();
                let p = mem.as_mut_ptr() as *mut u8;
                frame.stack.push(mem);
                Ok(RtValue::Ptr(p))
            }
            Inst::ICmpEq { lhs, rhs } => {
                let equal = match (frame.get(lhs)?, frame.get(rhs)?) {
                    (RtValue::Int(a), RtValue::Int(b)) => a == b,
                    (RtValue::Bool(a), RtValue::Bool(b)) => a == b,
                    (RtValue::Ptr(a), RtValue::Ptr(b)) => a == b,
                    _ => return Err(self.type_error(func, "icmp on mismatched values")),
                };
                Ok(RtValue::Bool(equal))
            }
            Inst::Or { lhs, rhs } | Inst::And { lhs, rhs } => {
                let is_or = matches!(inst, Inst::Or { .. });
                match (frame.get(lhs)?, frame.get(rhs)?) {
                    (RtValue::Int(a), RtValue::Int(b)) => {
                        Ok(RtValue::Int(if is_or { a | b } else { a & b }))
                    }
                    (RtValue::Bool(a), RtValue::Bool(b)) => {
                        Ok(RtValue::Bool(if is_or { a | b } else { a & b }))
                    }
                    _ => Err(self.type_error(func, "bitwise op on non-integers")),
                }
            }
            Inst::StructGep { base, index } => {
                let base_ptr = match frame.get(base)? {
                    RtValue::Ptr(p) => p,
                    _ => return Err(self.type_error(func, "gep on a non-pointer")),
                };
                let offset = func
                    .value_type(base)
                    .and_then(|t| self.module.types.pointee(t))
                    .and_then(|t| self.module.types.struct_type(t))
                    .and_then(|st| st.fields.get(*index as usize))
                    .map(|f| f.offset)
                    .ok_or_else(|| self.type_error(func, "gep into a non-struct"))?;
                Ok(RtValue::Ptr(base_ptr.add(offset)))
            }
            Inst::Load { ptr } => {
                let p = frame.ptr(self, ptr)?;
                self.load(p, ty)
            }
            Inst::Store { value, ptr } => {
                let v = frame.get(value)?;
                let p = frame.ptr(self, ptr)?;
                let vt = func
                    .value_type(value)
                    .ok_or_else(|| InterpError::UndefinedValue(func.name.clone()))?;
                self.store(p, vt, v)?;
                Ok(RtValue::Void)
            }
            Inst::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(frame.get(a)?);
                }
                match callee {
                    Callee::Function(target) => self.run_at_depth(*target, &values, depth + 1),
                    Callee::Parse(parse_fn) => self.call_parser(func, *parse_fn, &values),
                }
            }
            Inst::CondBr { .. } | Inst::Ret { .. } => {
                Err(self.type_error(func, "terminator in instruction position"))
            }
        }
    }

    unsafe fn load(&self, p: *mut u8, ty: TypeId) -> Result<RtValue, InterpError> {
        Ok(match self.module.types.kind(ty) {
            TypeKind::Bool => RtValue::Bool(ptr::read_unaligned(p) != 0),
            TypeKind::Int(8) => RtValue::Int(ptr::read_unaligned(p as *const i8) as i64),
            TypeKind::Int(16) => RtValue::Int(ptr::read_unaligned(p as *const i16) as i64),
            TypeKind::Int(32) => RtValue::Int(ptr::read_unaligned(p as *const i32) as i64),
            TypeKind::Int(64) => RtValue::Int(ptr::read_unaligned(p as *const i64)),
            TypeKind::Usize => RtValue::Int(ptr::read_unaligned(p as *const usize) as i64),
            TypeKind::Float(32) => RtValue::F32(ptr::read_unaligned(p as *const f32)),
            TypeKind::Float(64) => RtValue::F64(ptr::read_unaligned(p as *const f64)),
            TypeKind::Ptr(_) => RtValue::Ptr(ptr::read_unaligned(p as *const *mut u8)),
            _ => return Err(InterpError::UnsupportedType(self.module.types.name(ty))),
        })
    }

    unsafe fn store(&self, p: *mut u8, ty: TypeId, value: RtValue) -> Result<(), InterpError> {
        match (self.module.types.kind(ty), value) {
            (TypeKind::Bool, RtValue::Bool(b)) => ptr::write_unaligned(p as *mut bool, b),
            (TypeKind::Int(8), RtValue::Int(v)) => ptr::write_unaligned(p as *mut i8, v as i8),
            (TypeKind::Int(16), RtValue::Int(v)) => ptr::write_unaligned(p as *mut i16, v as i16),
            (TypeKind::Int(32), RtValue::Int(v)) => ptr::write_unaligned(p as *mut i32, v as i32),
            (TypeKind::Int(64), RtValue::Int(v)) => ptr::write_unaligned(p as *mut i64, v),
            (TypeKind::Usize, RtValue::Int(v)) => ptr::write_unaligned(p as *mut usize, v as usize),
            (TypeKind::Float(32), RtValue::F32(v)) => ptr::write_unaligned(p as *mut f32, v),
            (TypeKind::Float(64), RtValue::F64(v)) => ptr::write_unaligned(p as *mut f64, v),
            (TypeKind::Ptr(_), RtValue::Ptr(v)) => ptr::write_unaligned(p as *mut *mut u8, v),
            _ => return Err(InterpError::UnsupportedType(self.module.types.name(ty))),
        }
        Ok(())
    }

    /// `(data, len, status*) -> value`; the status is written as an `i32`
    unsafe fn call_parser(
        &self,
        func: &Function,
        parse_fn: ParseFn,
        args: &[RtValue],
    ) -> Result<RtValue, InterpError> {
        let (data, len, status) = match args {
            [RtValue::Ptr(d), RtValue::Int(l), RtValue::Ptr(s)] => (*d, *l as usize, *s),
            _ => return Err(self.type_error(func, "bad parser arguments")),
        };
        let field: &[u8] = if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(data, len)
        };
        let (value, result) = match parse_fn {
            ParseFn::StringToBool => wrap(bool::parse_field(field), RtValue::Bool),
            ParseFn::StringToInt8 => wrap(i8::parse_field(field), |v| RtValue::Int(v as i64)),
            ParseFn::StringToInt16 => wrap(i16::parse_field(field), |v| RtValue::Int(v as i64)),
            ParseFn::StringToInt32 => wrap(i32::parse_field(field), |v| RtValue::Int(v as i64)),
            ParseFn::StringToInt64 => wrap(i64::parse_field(field), RtValue::Int),
            ParseFn::StringToFloat => wrap(f32::parse_field(field), RtValue::F32),
            ParseFn::StringToDouble => wrap(f64::parse_field(field), RtValue::F64),
        };
        ptr::write_unaligned(status as *mut i32, result as i32);
        Ok(value)
    }
}

fn wrap<T>(parsed: (T, ParseResult), f: impl FnOnce(T) -> RtValue) -> (RtValue, ParseResult) {
    (f(parsed.0), parsed.1)
}

impl Frame<'_> {
    fn get(&self, value: &Value) -> Result<RtValue, InterpError> {
        match value {
            Value::Arg(i) => self
                .args
                .get(*i as usize)
                .copied()
                .ok_or_else(|| InterpError::UndefinedValue(self.func.name.clone())),
            Value::Inst(id) => self
                .values
                .get(id.index())
                .copied()
                .flatten()
                .ok_or_else(|| InterpError::UndefinedValue(self.func.name.clone())),
            Value::Const(Constant::Bool(b)) => Ok(RtValue::Bool(*b)),
            Value::Const(Constant::Int { value, .. }) => Ok(RtValue::Int(*value)),
        }
    }

    fn ptr(&self, interp: &Interpreter<'_>, value: &Value) -> Result<*mut u8, InterpError> {
        match self.get(value)? {
            RtValue::Ptr(p) if !p.is_null() => Ok(p),
            _ => Err(interp.type_error(self.func, "dereference of a non-pointer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, Param};

    /// `i32 f(i8* data, usize len)` that parses an int and returns it
    fn parse_int_module() -> (Module, FunctionId) {
        let mut module = Module::new();
        let status_ptr = module.types.ptr_to(TypeId::I32);
        let mut f = Function::new(
            "parse",
            vec![
                Param {
                    name: "data".to_string(),
                    ty: TypeId::BYTES,
                },
                Param {
                    name: "len".to_string(),
                    ty: TypeId::USIZE,
                },
            ],
            TypeId::I32,
        );
        let status = f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, status_ptr, None);
        let value = f.append(
            BlockId::ENTRY,
            Inst::Call {
                callee: Callee::Parse(ParseFn::StringToInt32),
                args: vec![Value::Arg(0), Value::Arg(1), Value::Inst(status)],
            },
            TypeId::I32,
            None,
        );
        f.append(
            BlockId::ENTRY,
            Inst::Ret {
                value: Some(Value::Inst(value)),
            },
            TypeId::VOID,
            None,
        );
        let id = module.add_function(f);
        (module, id)
    }

    #[test]
    fn test_parser_call() {
        let (module, id) = parse_int_module();
        let text = b"-77";
        let result = unsafe {
            Interpreter::new(&module).run(
                id,
                &[
                    RtValue::Ptr(text.as_ptr() as *mut u8),
                    RtValue::Int(text.len() as i64),
                ],
            )
        };
        assert_eq!(result, Ok(RtValue::Int(-77)));
    }

    #[test]
    fn test_wrong_arity() {
        let (module, id) = parse_int_module();
        let result = unsafe { Interpreter::new(&module).run(id, &[]) };
        assert!(matches!(result, Err(InterpError::TypeError(_, _))));
    }
}
