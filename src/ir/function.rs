//! Functions, blocks and instructions
//!
//! A deliberately small, LLVM-shaped IR: typed values, named basic blocks,
//! and just the instructions a write-slot routine and its null-marking
//! helper need.

use super::types::{TypeId, TypeTable};
use crate::string_parser::ParseFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub(crate) u32);

impl FunctionId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl InstId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Bool(bool),
    Int { ty: TypeId, value: i64 },
}

impl Constant {
    pub fn ty(&self) -> TypeId {
        match self {
            Constant::Bool(_) => TypeId::BOOL,
            Constant::Int { ty, .. } => *ty,
        }
    }
}

/// An operand: a function argument, an instruction result, or a constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Arg(u32),
    Inst(InstId),
    Const(Constant),
}

/// Target of a call instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// Another function in the same module
    Function(FunctionId),
    /// A built-in text parser: `(data, len, result*) -> value`
    Parse(ParseFn),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Alloca { ty: TypeId },
    ICmpEq { lhs: Value, rhs: Value },
    Or { lhs: Value, rhs: Value },
    And { lhs: Value, rhs: Value },
    StructGep { base: Value, index: u32 },
    Load { ptr: Value },
    Store { value: Value, ptr: Value },
    Call { callee: Callee, args: Vec<Value> },
    CondBr {
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Ret { value: Option<Value> },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::CondBr { .. } | Inst::Ret { .. })
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            Inst::Alloca { .. } => Vec::new(),
            Inst::ICmpEq { lhs, rhs } | Inst::Or { lhs, rhs } | Inst::And { lhs, rhs } => {
                vec![*lhs, *rhs]
            }
            Inst::StructGep { base, .. } => vec![*base],
            Inst::Load { ptr } => vec![*ptr],
            Inst::Store { value, ptr } => vec![*value, *ptr],
            Inst::Call { args, .. } => args.clone(),
            Inst::CondBr { cond, .. } => vec![*cond],
            Inst::Ret { value } => value.iter().copied().collect(),
        }
    }
}

/// An instruction with its result type and optional name
#[derive(Debug, Clone, PartialEq)]
pub struct InstData {
    pub inst: Inst,
    pub ty: TypeId,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeId,
    pub blocks: Vec<Block>,
    pub insts: Vec<InstData>,
}

impl Function {
    /// Create a function with an empty `entry` block
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: TypeId) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: vec![Block {
                name: "entry".to_string(),
                insts: Vec::new(),
            }],
            insts: Vec::new(),
        }
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        let name = self.unique_block_name(name);
        self.blocks.push(Block {
            name,
            insts: Vec::new(),
        });
        BlockId((self.blocks.len() - 1) as u32)
    }

    /// Append an instruction to the end of `block`
    pub fn append(&mut self, block: BlockId, inst: Inst, ty: TypeId, name: Option<&str>) -> InstId {
        let id = self.push_inst(inst, ty, name);
        self.blocks[block.index()].insts.push(id);
        id
    }

    /// Insert an instruction at the start of `block`
    pub fn prepend(&mut self, block: BlockId, inst: Inst, ty: TypeId, name: Option<&str>) -> InstId {
        let id = self.push_inst(inst, ty, name);
        self.blocks[block.index()].insts.insert(0, id);
        id
    }

    fn push_inst(&mut self, inst: Inst, ty: TypeId, name: Option<&str>) -> InstId {
        let name = name
            .filter(|n| !n.is_empty())
            .map(|n| self.unique_value_name(n));
        self.insts.push(InstData { inst, ty, name });
        InstId((self.insts.len() - 1) as u32)
    }

    fn unique_value_name(&self, base: &str) -> String {
        let taken = |candidate: &str| {
            self.params.iter().any(|p| p.name == candidate)
                || self
                    .insts
                    .iter()
                    .any(|i| i.name.as_deref() == Some(candidate))
        };
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn unique_block_name(&self, base: &str) -> String {
        let taken = |candidate: &str| self.blocks.iter().any(|b| b.name == candidate);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        id.index() < self.blocks.len()
    }

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.index()]
    }

    /// Instructions of `block`, in order
    pub fn block_insts(&self, id: BlockId) -> impl Iterator<Item = &InstData> + '_ {
        self.blocks[id.index()]
            .insts
            .iter()
            .map(move |i| &self.insts[i.index()])
    }

    /// Last instruction of `block`, if it is a terminator
    pub fn terminator(&self, id: BlockId) -> Option<&Inst> {
        self.blocks[id.index()]
            .insts
            .last()
            .map(|i| &self.insts[i.index()].inst)
            .filter(|inst| inst.is_terminator())
    }

    /// Type of a value as seen from inside this function
    pub fn value_type(&self, value: &Value) -> Option<TypeId> {
        match value {
            Value::Arg(i) => self.params.get(*i as usize).map(|p| p.ty),
            Value::Inst(id) => self.insts.get(id.index()).map(|i| i.ty),
            Value::Const(c) => Some(c.ty()),
        }
    }
}

/// Owns the types and functions produced by one code generator
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: TypeTable,
    functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function; a name clash gets a numeric suffix
    pub fn add_function(&mut self, mut function: Function) -> FunctionId {
        if self.find_function(&function.name).is_some() {
            let base = function.name.clone();
            let mut n = 1;
            while self.find_function(&format!("{}.{}", base, n)).is_some() {
                n += 1;
            }
            function.name = format!("{}.{}", base, n);
        }
        self.functions.push(function);
        FunctionId((self.functions.len() - 1) as u32)
    }

    /// Append without renaming; the caller guarantees unique names
    pub(super) fn push_function(&mut self, function: Function) -> FunctionId {
        self.functions.push(function);
        FunctionId((self.functions.len() - 1) as u32)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.index())
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionId(i as u32))
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> + '_ {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let mut f = Function::new(
            "f",
            vec![Param {
                name: "len".to_string(),
                ty: TypeId::USIZE,
            }],
            TypeId::VOID,
        );
        let a = f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, TypeId::I32, Some("x"));
        let b = f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, TypeId::I32, Some("x"));
        let c = f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, TypeId::I32, Some("len"));
        assert_eq!(f.inst(a).name.as_deref(), Some("x"));
        assert_eq!(f.inst(b).name.as_deref(), Some("x1"));
        assert_eq!(f.inst(c).name.as_deref(), Some("len1"));

        let blk = f.add_block("entry");
        assert_eq!(f.block(blk).name, "entry1");
    }

    #[test]
    fn test_prepend_and_terminator() {
        let mut f = Function::new("f", Vec::new(), TypeId::VOID);
        assert!(f.terminator(BlockId::ENTRY).is_none());
        f.append(BlockId::ENTRY, Inst::Ret { value: None }, TypeId::VOID, None);
        let first = f.prepend(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I8 }, TypeId::I8, None);
        assert_eq!(f.block(BlockId::ENTRY).insts[0], first);
        assert!(matches!(f.terminator(BlockId::ENTRY), Some(Inst::Ret { value: None })));
    }

    #[test]
    fn test_module_name_clash() {
        let mut module = Module::new();
        let a = module.add_function(Function::new("SetNull", Vec::new(), TypeId::VOID));
        let b = module.add_function(Function::new("SetNull", Vec::new(), TypeId::VOID));
        assert_ne!(a, b);
        assert_eq!(module.function(b).unwrap().name, "SetNull.1");
        assert_eq!(module.find_function("SetNull"), Some(a));
    }
}
