//! Standalone copies of functions
//!
//! [`Module::extract`] copies one function, every function it calls, and
//! only the types those functions mention into a fresh module. Type and
//! function ids are renumbered on the way.

use super::function::{Callee, Constant, Function, FunctionId, Inst, Module, Value};
use super::types::{StructType, TypeId, TypeKind};
use std::collections::HashMap;

impl Module {
    /// Copy `root` and its callees into a new module.
    ///
    /// Returns the new module and the id of `root` within it, or `None` if
    /// `root` (or a function it calls) is not in this module.
    pub fn extract(&self, root: FunctionId) -> Option<(Module, FunctionId)> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if order.contains(&id) {
                continue;
            }
            let func = self.function(id)?;
            order.push(id);
            for data in &func.insts {
                if let Inst::Call {
                    callee: Callee::Function(callee),
                    ..
                } = data.inst
                {
                    stack.push(callee);
                }
            }
        }

        let func_map: HashMap<FunctionId, FunctionId> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, FunctionId(i as u32)))
            .collect();

        let mut out = Module::new();
        let mut importer = TypeImporter {
            source: self,
            map: HashMap::new(),
        };
        for id in &order {
            let func = self.function(*id)?;
            let copy = importer.function(&mut out, func, &func_map)?;
            out.push_function(copy);
        }
        Some((out, func_map[&root]))
    }
}

struct TypeImporter<'a> {
    source: &'a Module,
    map: HashMap<TypeId, TypeId>,
}

impl TypeImporter<'_> {
    fn ty(&mut self, out: &mut Module, ty: TypeId) -> TypeId {
        if ty.index() <= TypeId::TIMESTAMP_VALUE.index() {
            return ty;
        }
        if let Some(mapped) = self.map.get(&ty) {
            return *mapped;
        }
        let mapped = match self.source.types.kind(ty).clone() {
            TypeKind::Ptr(inner) => {
                let inner = self.ty(out, inner);
                out.types.ptr_to(inner)
            }
            TypeKind::Struct(st) => {
                let fields = st
                    .fields
                    .into_iter()
                    .map(|mut field| {
                        field.ty = self.ty(out, field.ty);
                        field
                    })
                    .collect();
                out.types.add_struct(StructType { fields, ..st })
            }
            // Scalars are all builtin.
            _ => ty,
        };
        self.map.insert(ty, mapped);
        mapped
    }

    fn value(&mut self, out: &mut Module, value: Value) -> Value {
        match value {
            Value::Const(Constant::Int { ty, value }) => Value::Const(Constant::Int {
                ty: self.ty(out, ty),
                value,
            }),
            other => other,
        }
    }

    fn function(
        &mut self,
        out: &mut Module,
        func: &Function,
        func_map: &HashMap<FunctionId, FunctionId>,
    ) -> Option<Function> {
        let mut copy = func.clone();
        copy.ret = self.ty(out, func.ret);
        for param in &mut copy.params {
            param.ty = self.ty(out, param.ty);
        }
        for data in &mut copy.insts {
            data.ty = self.ty(out, data.ty);
            data.inst = match &data.inst {
                Inst::Alloca { ty } => Inst::Alloca {
                    ty: self.ty(out, *ty),
                },
                Inst::ICmpEq { lhs, rhs } => Inst::ICmpEq {
                    lhs: self.value(out, *lhs),
                    rhs: self.value(out, *rhs),
                },
                Inst::Or { lhs, rhs } => Inst::Or {
                    lhs: self.value(out, *lhs),
                    rhs: self.value(out, *rhs),
                },
                Inst::And { lhs, rhs } => Inst::And {
                    lhs: self.value(out, *lhs),
                    rhs: self.value(out, *rhs),
                },
                Inst::StructGep { base, index } => Inst::StructGep {
                    base: self.value(out, *base),
                    index: *index,
                },
                Inst::Load { ptr } => Inst::Load {
                    ptr: self.value(out, *ptr),
                },
                Inst::Store { value, ptr } => Inst::Store {
                    value: self.value(out, *value),
                    ptr: self.value(out, *ptr),
                },
                Inst::Call { callee, args } => Inst::Call {
                    callee: match callee {
                        Callee::Function(id) => Callee::Function(*func_map.get(id)?),
                        Callee::Parse(p) => Callee::Parse(*p),
                    },
                    args: args.iter().map(|a| self.value(out, *a)).collect(),
                },
                Inst::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => Inst::CondBr {
                    cond: self.value(out, *cond),
                    then_dest: *then_dest,
                    else_dest: *else_dest,
                },
                Inst::Ret { value } => Inst::Ret {
                    value: value.map(|v| self.value(out, v)),
                },
            };
        }
        Some(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::SlotCodegen;
    use crate::descriptor::{TupleDescriptorBuilder, TupleId};
    use crate::ir::verify_function;
    use crate::text_converter::TextConverter;
    use crate::types::PrimitiveType;

    #[test]
    fn test_extract_keeps_only_reachable_code() {
        let desc = TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::Int, true)
            .add_slot(PrimitiveType::String, true)
            .build();
        let converter = TextConverter::default();
        let mut codegen = SlotCodegen::new();
        for slot in desc.slots() {
            assert!(converter
                .codegen_write_slot(&mut codegen, &desc, slot)
                .is_some());
        }
        let module = codegen.module();
        assert_eq!(module.len(), 4);

        let second = module.find_function("WriteSlot.1").unwrap();
        let (copy, root) = module.extract(second).unwrap();
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.function(root).unwrap().name, "WriteSlot.1");
        assert!(verify_function(&copy, root).is_ok());

        // Only the one tuple struct and its pointer came along.
        let structs = copy
            .functions()
            .flat_map(|(_, f)| f.params.iter().map(|p| p.ty))
            .filter(|ty| copy.types.pointee(*ty).is_some_and(|t| copy.types.struct_type(t).is_some()))
            .collect::<Vec<_>>();
        assert!(!structs.is_empty());
        assert!(structs.iter().all(|ty| *ty == structs[0]));
        assert_eq!(
            copy.display_function(root).unwrap().to_string(),
            module.display_function(second).unwrap().to_string()
        );
    }

    #[test]
    fn test_extract_unknown_function() {
        let module = Module::new();
        assert!(module.extract(FunctionId(3)).is_none());
    }
}
