//! Textual IR listing
//!
//! Prints modules in an LLVM-flavoured syntax, e.g.
//!
//! ```text
//! define i1 @WriteSlot(%Tuple0* %tuple_arg, i8* %data, usize %len) {
//! entry:
//!   %parse_result = alloca i32
//!   %0 = icmp eq usize %len, 0
//!   br i1 %0, label %set_null, label %parse_slot
//! ...
//! ```

use super::function::{BlockId, Callee, Constant, Function, FunctionId, Inst, Module, Value};
use super::types::TypeId;
use std::fmt;

/// Display adapter for a single function
pub struct FunctionDisplay<'a> {
    module: &'a Module,
    function: &'a Function,
}

impl Module {
    pub fn display_function(&self, id: FunctionId) -> Option<FunctionDisplay<'_>> {
        self.function(id).map(|function| FunctionDisplay {
            module: self,
            function,
        })
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, function)) in self.functions().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{}",
                FunctionDisplay {
                    module: self,
                    function
                }
            )?;
        }
        Ok(())
    }
}

impl FunctionDisplay<'_> {
    fn value(&self, value: &Value) -> String {
        match value {
            Value::Arg(i) => match self.function.params.get(*i as usize) {
                Some(p) => format!("%{}", p.name),
                None => format!("%arg{}", i),
            },
            Value::Inst(id) => match &self.function.inst(*id).name {
                Some(name) => format!("%{}", name),
                None => format!("%{}", self.unnamed_index(id.index())),
            },
            Value::Const(Constant::Bool(b)) => b.to_string(),
            Value::Const(Constant::Int { value, .. }) => value.to_string(),
        }
    }

    /// Unnamed values are numbered in creation order
    fn unnamed_index(&self, inst_index: usize) -> usize {
        self.function.insts[..inst_index]
            .iter()
            .filter(|i| i.name.is_none() && i.ty != TypeId::VOID)
            .count()
    }

    fn typed(&self, value: &Value) -> String {
        let ty = self
            .function
            .value_type(value)
            .map(|t| self.module.types.name(t))
            .unwrap_or_else(|| "?".to_string());
        format!("{} {}", ty, self.value(value))
    }

    fn callee_name(&self, callee: &Callee) -> String {
        match callee {
            Callee::Function(id) => self
                .module
                .function(*id)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("fn{}", id.index())),
            Callee::Parse(pf) => pf.symbol().to_string(),
        }
    }

    fn block_name(&self, id: BlockId) -> String {
        if self.function.has_block(id) {
            self.function.block(id).name.clone()
        } else {
            format!("bb{}", id.index())
        }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = &self.module.types;
        let params: Vec<String> = self
            .function
            .params
            .iter()
            .map(|p| format!("{} %{}", types.name(p.ty), p.name))
            .collect();
        writeln!(
            f,
            "define {} @{}({}) {{",
            types.name(self.function.ret),
            self.function.name,
            params.join(", ")
        )?;

        for (bi, block) in self.function.blocks.iter().enumerate() {
            if bi > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;
            for id in &block.insts {
                let data = self.function.inst(*id);
                let lhs = if data.ty == TypeId::VOID {
                    String::new()
                } else {
                    format!("{} = ", self.value(&Value::Inst(*id)))
                };
                let body = match &data.inst {
                    Inst::Alloca { ty } => format!("alloca {}", types.name(*ty)),
                    Inst::ICmpEq { lhs, rhs } => {
                        format!("icmp eq {}, {}", self.typed(lhs), self.value(rhs))
                    }
                    Inst::Or { lhs, rhs } => format!("or {}, {}", self.typed(lhs), self.value(rhs)),
                    Inst::And { lhs, rhs } => {
                        format!("and {}, {}", self.typed(lhs), self.value(rhs))
                    }
                    Inst::StructGep { base, index } => format!(
                        "getelementptr inbounds {}, i32 0, i32 {}",
                        self.typed(base),
                        index
                    ),
                    Inst::Load { ptr } => format!("load {}", self.typed(ptr)),
                    Inst::Store { value, ptr } => {
                        format!("store {}, {}", self.typed(value), self.typed(ptr))
                    }
                    Inst::Call { callee, args } => {
                        let args: Vec<String> = args.iter().map(|a| self.typed(a)).collect();
                        format!(
                            "call {} @{}({})",
                            types.name(data.ty),
                            self.callee_name(callee),
                            args.join(", ")
                        )
                    }
                    Inst::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => format!(
                        "br {}, label %{}, label %{}",
                        self.typed(cond),
                        self.block_name(*then_dest),
                        self.block_name(*else_dest)
                    ),
                    Inst::Ret { value: Some(v) } => format!("ret {}", self.typed(v)),
                    Inst::Ret { value: None } => "ret void".to_string(),
                };
                writeln!(f, "  {}{}", lhs, body)?;
            }
        }
        writeln!(f, "}}")
    }
}
