//! IR-building backend
//!
//! [`SlotCodegen`] implements [`CodegenBackend`] on top of an [`ir::Module`](Module).
//! Every emitted instruction is type checked as it is built, so a finished
//! function only has to pass the structural verifier before lowering.

use super::{CodegenBackend, CodegenError, ExecutionMode, FnPrototype, NamedVariable};
use crate::compile::{check_write_slot_signature, Compiler, WriteSlotFn};
use crate::ir::{
    verify_function, BlockId, Callee, Function, FunctionId, Inst, Module, Param, StructType,
    TypeId, TypeKind, Value,
};
use crate::types::PrimitiveType;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Counters kept by a [`SlotCodegen`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodegenStats {
    pub functions_declared: usize,
    pub functions_finalized: usize,
    /// Time spent in `finalize_function`
    pub codegen_time_ns: u64,
}

/// The default code generator
pub struct SlotCodegen {
    module: Module,
    insert_point: Option<(FunctionId, BlockId)>,
    mode: ExecutionMode,
    compiler: Compiler,
    stats: CodegenStats,
}

impl SlotCodegen {
    pub fn new() -> Self {
        Self::with_mode(ExecutionMode::Compiled)
    }

    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self {
            module: Module::new(),
            insert_point: None,
            mode,
            compiler: Compiler::new(),
            stats: CodegenStats::default(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Drop every function and type built so far. Stats and mode stay.
    pub fn reset(&mut self) {
        self.module = Module::new();
        self.insert_point = None;
    }

    pub fn stats(&self) -> CodegenStats {
        self.stats
    }

    fn function(&self, id: FunctionId) -> Result<&Function, CodegenError> {
        self.module
            .function(id)
            .ok_or(CodegenError::UnknownFunction(id))
    }

    fn value_type(&self, func: FunctionId, value: &Value) -> Result<TypeId, CodegenError> {
        self.function(func)?
            .value_type(value)
            .filter(|ty| self.module.types.contains(*ty))
            .ok_or_else(|| CodegenError::TypeMismatch(format!("{:?} is not defined", value)))
    }

    fn type_name(&self, ty: TypeId) -> String {
        self.module.types.name(ty)
    }

    /// Append at the insert point, refusing to grow a terminated block
    fn emit(&mut self, inst: Inst, ty: TypeId, name: &str) -> Result<Value, CodegenError> {
        let (func_id, block) = self.insert_point.ok_or(CodegenError::NoInsertPoint)?;
        let func = self
            .module
            .function_mut(func_id)
            .ok_or(CodegenError::UnknownFunction(func_id))?;
        if !func.has_block(block) {
            return Err(CodegenError::NoInsertPoint);
        }
        if func.terminator(block).is_some() {
            return Err(CodegenError::BlockTerminated(func.block(block).name.clone()));
        }
        let name = (!name.is_empty()).then_some(name);
        Ok(Value::Inst(func.append(block, inst, ty, name)))
    }

    fn current_function(&self) -> Result<FunctionId, CodegenError> {
        self.insert_point
            .map(|(f, _)| f)
            .ok_or(CodegenError::NoInsertPoint)
    }

    fn binary_int(
        &mut self,
        lhs: Value,
        rhs: Value,
        name: &str,
        make: fn(Value, Value) -> Inst,
        result_bool: bool,
    ) -> Result<Value, CodegenError> {
        let func = self.current_function()?;
        let lt = self.value_type(func, &lhs)?;
        let rt = self.value_type(func, &rhs)?;
        let comparable =
            self.module.types.is_int(lt) || self.module.types.pointee(lt).is_some();
        if lt != rt || !comparable {
            return Err(CodegenError::TypeMismatch(format!(
                "operands {} and {}",
                self.type_name(lt),
                self.type_name(rt)
            )));
        }
        let ty = if result_bool { TypeId::BOOL } else { lt };
        self.emit(make(lhs, rhs), ty, name)
    }

    fn pointee_of(&self, func: FunctionId, ptr: &Value) -> Result<TypeId, CodegenError> {
        let ty = self.value_type(func, ptr)?;
        self.module
            .types
            .pointee(ty)
            .ok_or_else(|| CodegenError::TypeMismatch(format!("{} is not a pointer", self.type_name(ty))))
    }
}

impl Default for SlotCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodegenBackend for SlotCodegen {
    fn get_type(&self, ty: PrimitiveType) -> TypeId {
        match ty {
            PrimitiveType::Boolean => TypeId::BOOL,
            PrimitiveType::TinyInt => TypeId::I8,
            PrimitiveType::SmallInt => TypeId::I16,
            PrimitiveType::Int => TypeId::I32,
            PrimitiveType::BigInt => TypeId::I64,
            PrimitiveType::Float => TypeId::F32,
            PrimitiveType::Double => TypeId::F64,
            PrimitiveType::String => TypeId::STRING_VALUE,
            PrimitiveType::Timestamp => TypeId::TIMESTAMP_VALUE,
        }
    }

    fn ptr_type(&mut self, pointee: TypeId) -> TypeId {
        self.module.types.ptr_to(pointee)
    }

    fn declare_struct(&mut self, st: StructType) -> Result<TypeId, CodegenError> {
        if let Some(field) = st.fields.iter().find(|f| !self.module.types.contains(f.ty)) {
            return Err(CodegenError::TypeMismatch(format!(
                "struct {} has a field of unknown type {:?}",
                st.name, field.ty
            )));
        }
        Ok(self.module.types.add_struct(st))
    }

    fn declare_function(
        &mut self,
        prototype: &FnPrototype,
    ) -> Result<(FunctionId, Vec<Value>), CodegenError> {
        let types = &self.module.types;
        if !types.contains(prototype.ret)
            || prototype.args.iter().any(|a| !types.contains(a.ty))
        {
            return Err(CodegenError::TypeMismatch(format!(
                "prototype {} uses an unknown type",
                prototype.name
            )));
        }
        let params = prototype
            .args
            .iter()
            .map(|a: &NamedVariable| Param {
                name: a.name.clone(),
                ty: a.ty,
            })
            .collect();
        let id = self
            .module
            .add_function(Function::new(prototype.name.clone(), params, prototype.ret));
        self.stats.functions_declared += 1;
        let args = (0..prototype.args.len() as u32).map(Value::Arg).collect();
        Ok((id, args))
    }

    fn create_if_else_blocks(
        &mut self,
        func: FunctionId,
        if_name: &str,
        else_name: &str,
    ) -> Result<(BlockId, BlockId), CodegenError> {
        let f = self
            .module
            .function_mut(func)
            .ok_or(CodegenError::UnknownFunction(func))?;
        Ok((f.add_block(if_name), f.add_block(else_name)))
    }

    fn create_entry_block_alloca(
        &mut self,
        func: FunctionId,
        var: &NamedVariable,
    ) -> Result<Value, CodegenError> {
        if !self.module.types.contains(var.ty) || var.ty == TypeId::VOID {
            return Err(CodegenError::TypeMismatch(format!(
                "cannot allocate {}",
                var.name
            )));
        }
        let ptr_ty = self.module.types.ptr_to(var.ty);
        let f = self
            .module
            .function_mut(func)
            .ok_or(CodegenError::UnknownFunction(func))?;
        let id = f.prepend(
            BlockId::ENTRY,
            Inst::Alloca { ty: var.ty },
            ptr_ty,
            Some(var.name.as_str()),
        );
        Ok(Value::Inst(id))
    }

    fn set_insert_point(&mut self, func: FunctionId, block: BlockId) {
        self.insert_point = Some((func, block));
    }

    fn icmp_eq(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError> {
        self.binary_int(lhs, rhs, name, |lhs, rhs| Inst::ICmpEq { lhs, rhs }, true)
    }

    fn or(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError> {
        self.binary_int(lhs, rhs, name, |lhs, rhs| Inst::Or { lhs, rhs }, false)
    }

    fn and(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, CodegenError> {
        self.binary_int(lhs, rhs, name, |lhs, rhs| Inst::And { lhs, rhs }, false)
    }

    fn cond_br(
        &mut self,
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> Result<(), CodegenError> {
        let func = self.current_function()?;
        if self.value_type(func, &cond)? != TypeId::BOOL {
            return Err(CodegenError::TypeMismatch(
                "branch condition must be i1".to_string(),
            ));
        }
        let f = self.function(func)?;
        if !f.has_block(then_dest) || !f.has_block(else_dest) {
            return Err(CodegenError::TypeMismatch(
                "branch to a block of another function".to_string(),
            ));
        }
        self.emit(
            Inst::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            TypeId::VOID,
            "",
        )?;
        Ok(())
    }

    fn struct_gep(&mut self, base: Value, index: u32, name: &str) -> Result<Value, CodegenError> {
        let func = self.current_function()?;
        let pointee = self.pointee_of(func, &base)?;
        let field_ty = match self.module.types.kind(pointee) {
            TypeKind::Struct(st) => st.fields.get(index as usize).map(|f| f.ty).ok_or_else(|| {
                CodegenError::TypeMismatch(format!("{} has no field {}", st.name, index))
            })?,
            _ => {
                return Err(CodegenError::TypeMismatch(format!(
                    "{} is not a struct",
                    self.type_name(pointee)
                )))
            }
        };
        let ty = self.module.types.ptr_to(field_ty);
        self.emit(Inst::StructGep { base, index }, ty, name)
    }

    fn load(&mut self, ptr: Value, name: &str) -> Result<Value, CodegenError> {
        let func = self.current_function()?;
        let ty = self.pointee_of(func, &ptr)?;
        self.emit(Inst::Load { ptr }, ty, name)
    }

    fn store(&mut self, value: Value, ptr: Value) -> Result<(), CodegenError> {
        let func = self.current_function()?;
        let pointee = self.pointee_of(func, &ptr)?;
        let vt = self.value_type(func, &value)?;
        if vt != pointee {
            return Err(CodegenError::TypeMismatch(format!(
                "cannot store {} through {}*",
                self.type_name(vt),
                self.type_name(pointee)
            )));
        }
        self.emit(Inst::Store { value, ptr }, TypeId::VOID, "")?;
        Ok(())
    }

    fn call(&mut self, callee: Callee, args: &[Value], name: &str) -> Result<Value, CodegenError> {
        let func = self.current_function()?;
        let (expected, ret) = match callee {
            Callee::Function(target) => {
                let f = self.function(target)?;
                (f.params.iter().map(|p| p.ty).collect::<Vec<_>>(), f.ret)
            }
            Callee::Parse(parse_fn) => {
                let status_ptr = self.module.types.ptr_to(TypeId::I32);
                (
                    vec![TypeId::BYTES, TypeId::USIZE, status_ptr],
                    parse_fn.result_type(),
                )
            }
        };
        if expected.len() != args.len() {
            return Err(CodegenError::TypeMismatch(format!(
                "call expects {} arguments, got {}",
                expected.len(),
                args.len()
            )));
        }
        for (arg, ty) in args.iter().zip(&expected) {
            if self.value_type(func, arg)? != *ty {
                return Err(CodegenError::TypeMismatch(format!(
                    "call argument should be {}",
                    self.type_name(*ty)
                )));
            }
        }
        let name = if ret == TypeId::VOID { "" } else { name };
        self.emit(
            Inst::Call {
                callee,
                args: args.to_vec(),
            },
            ret,
            name,
        )
    }

    fn ret(&mut self, value: Option<Value>) -> Result<(), CodegenError> {
        let func = self.current_function()?;
        let ty = match &value {
            Some(v) => self.value_type(func, v)?,
            None => TypeId::VOID,
        };
        let expected = self.function(func)?.ret;
        if ty != expected {
            return Err(CodegenError::TypeMismatch(format!(
                "return of {} from a function returning {}",
                self.type_name(ty),
                self.type_name(expected)
            )));
        }
        self.emit(Inst::Ret { value }, TypeId::VOID, "")?;
        Ok(())
    }

    fn finalize_function(&mut self, func: FunctionId) -> Result<WriteSlotFn, CodegenError> {
        let start = Instant::now();
        let routine = match self.mode {
            ExecutionMode::Compiled => self.compiler.compile(&self.module, func)?,
            ExecutionMode::Interpreted => {
                verify_function(&self.module, func).map_err(crate::compile::CompileError::from)?;
                let tuple_size = check_write_slot_signature(&self.module, func)?;
                let name = self.function(func)?.name.clone();
                let (module, root) = self
                    .module
                    .extract(func)
                    .ok_or(CodegenError::UnknownFunction(func))?;
                WriteSlotFn::interpreted(name, tuple_size, Arc::new(module), root)
            }
        };
        let elapsed = start.elapsed().as_nanos() as u64;
        self.stats.functions_finalized += 1;
        self.stats.codegen_time_ns += elapsed;
        debug!(
            function = %routine.name(),
            mode = ?self.mode,
            elapsed_ns = elapsed,
            "finalized write-slot routine"
        );
        Ok(routine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void_fn(codegen: &mut SlotCodegen) -> FunctionId {
        let (f, _) = codegen
            .declare_function(&FnPrototype::new("f", TypeId::VOID))
            .unwrap();
        f
    }

    #[test]
    fn test_requires_insert_point() {
        let mut codegen = SlotCodegen::new();
        assert_eq!(codegen.ret(None), Err(CodegenError::NoInsertPoint));
    }

    #[test]
    fn test_rejects_code_after_terminator() {
        let mut codegen = SlotCodegen::new();
        let f = void_fn(&mut codegen);
        codegen.set_insert_point(f, BlockId::ENTRY);
        codegen.ret(None).unwrap();
        assert_eq!(
            codegen.ret(None),
            Err(CodegenError::BlockTerminated("entry".to_string()))
        );
    }

    #[test]
    fn test_type_checks() {
        let mut codegen = SlotCodegen::new();
        let f = void_fn(&mut codegen);
        codegen.set_insert_point(f, BlockId::ENTRY);

        let a = codegen.int_constant(TypeId::I8, 1);
        let b = codegen.int_constant(TypeId::I32, 1);
        assert!(matches!(
            codegen.or(a, b, "x"),
            Err(CodegenError::TypeMismatch(_))
        ));
        assert!(matches!(
            codegen.load(a, "x"),
            Err(CodegenError::TypeMismatch(_))
        ));
        let t = codegen.true_value();
        assert!(matches!(
            codegen.ret(Some(t)),
            Err(CodegenError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_entry_alloca_goes_first() {
        let mut codegen = SlotCodegen::new();
        let f = void_fn(&mut codegen);
        codegen.set_insert_point(f, BlockId::ENTRY);
        let one = codegen.int_constant(TypeId::I8, 1);
        codegen.or(one, one, "two").unwrap();
        let slot = codegen
            .create_entry_block_alloca(f, &NamedVariable::new("tmp", TypeId::I32))
            .unwrap();
        let ptr_i32 = codegen.ptr_type(TypeId::I32);
        let func = codegen.module().function(f).unwrap();
        assert_eq!(Value::Inst(func.block(BlockId::ENTRY).insts[0]), slot);
        assert_eq!(func.value_type(&slot), Some(ptr_i32));
    }

    #[test]
    fn test_parse_call_signature() {
        let mut codegen = SlotCodegen::new();
        let mut proto = FnPrototype::new("p", TypeId::VOID);
        proto.add_argument(NamedVariable::new("data", TypeId::BYTES));
        proto.add_argument(NamedVariable::new("len", TypeId::USIZE));
        let (f, args) = codegen.declare_function(&proto).unwrap();
        codegen.set_insert_point(f, BlockId::ENTRY);
        let status = codegen
            .create_entry_block_alloca(f, &NamedVariable::new("status", TypeId::I32))
            .unwrap();
        let callee = codegen.get_parse_function(crate::string_parser::ParseFn::StringToInt16);
        let value = codegen
            .call(callee, &[args[0], args[1], status], "value")
            .unwrap();
        assert_eq!(
            codegen.module().function(f).unwrap().value_type(&value),
            Some(TypeId::I16)
        );
        assert!(codegen.call(callee, &[args[0], args[1]], "bad").is_err());
        assert_eq!(codegen.stats().functions_declared, 1);
    }

    #[test]
    fn test_interpreted_routine_owns_its_code() {
        use crate::descriptor::{TupleDescriptorBuilder, TupleId};
        use crate::text_converter::TextConverter;
        use crate::types::PrimitiveType;

        let desc = TupleDescriptorBuilder::new(TupleId(2))
            .add_slot(PrimitiveType::Int, true)
            .add_slot(PrimitiveType::Double, true)
            .add_slot(PrimitiveType::String, true)
            .add_slot(PrimitiveType::Boolean, true)
            .build();
        let converter = TextConverter::default();
        let mut codegen = SlotCodegen::with_mode(ExecutionMode::Interpreted);
        let routines: Vec<_> = desc
            .slots()
            .iter()
            .map(|slot| converter.codegen_write_slot(&mut codegen, &desc, slot).unwrap())
            .collect();
        assert_eq!(codegen.module().len(), 8);
        for routine in &routines {
            let module = routine.module().unwrap();
            assert_eq!(module.len(), 2);
            assert!(module.find_function(routine.name()).is_some());
        }

        codegen.reset();
        assert!(codegen.module().is_empty());
        assert_eq!(codegen.stats().functions_finalized, 4);
        let mut tuple = crate::tuple::TupleBuffer::for_descriptor(&desc);
        assert!(routines[0].write(&mut tuple, b"17"));
        assert_eq!(
            unsafe { tuple.datum(&desc.slots()[0]) },
            crate::tuple::Datum::Int(17)
        );
    }
}
