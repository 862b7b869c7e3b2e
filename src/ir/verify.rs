//! Structural verification of IR functions
//!
//! Run before a function is lowered so malformed IR is rejected instead of
//! producing a routine with undefined behaviour.

use super::function::{Block, Callee, Function, FunctionId, Inst, Module, Value};
use super::types::TypeId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Unknown function {0:?}")]
    UnknownFunction(FunctionId),
    #[error("Block '{0}' is empty")]
    EmptyBlock(String),
    #[error("Block '{0}' does not end in a terminator")]
    MissingTerminator(String),
    #[error("Block '{0}' has instructions after its terminator")]
    CodeAfterTerminator(String),
    #[error("Branch in block '{0}' targets a missing block")]
    UnknownBlock(String),
    #[error("Block '{0}' uses an undefined value")]
    UndefinedValue(String),
    #[error("Block '{0}' calls an unknown function")]
    UnknownCallee(String),
    #[error("Function '{0}' returns a value of the wrong type")]
    ReturnMismatch(String),
}

/// Check that `id` is well formed
pub fn verify_function(module: &Module, id: FunctionId) -> Result<(), VerifyError> {
    let func = module
        .function(id)
        .ok_or(VerifyError::UnknownFunction(id))?;

    for block in &func.blocks {
        let Some((last, body)) = block.insts.split_last() else {
            return Err(VerifyError::EmptyBlock(block.name.clone()));
        };
        if !func.inst(*last).inst.is_terminator() {
            return Err(VerifyError::MissingTerminator(block.name.clone()));
        }
        if body.iter().any(|i| func.inst(*i).inst.is_terminator()) {
            return Err(VerifyError::CodeAfterTerminator(block.name.clone()));
        }

        for (pos, inst_id) in block.insts.iter().enumerate() {
            let inst = &func.inst(*inst_id).inst;
            for operand in inst.operands() {
                if !is_defined(func, block, pos, &operand) {
                    return Err(VerifyError::UndefinedValue(block.name.clone()));
                }
            }
            match inst {
                Inst::CondBr {
                    then_dest,
                    else_dest,
                    ..
                } if !func.has_block(*then_dest) || !func.has_block(*else_dest) => {
                    return Err(VerifyError::UnknownBlock(block.name.clone()));
                }
                Inst::Call {
                    callee: Callee::Function(target),
                    ..
                } if module.function(*target).is_none() => {
                    return Err(VerifyError::UnknownCallee(block.name.clone()));
                }
                Inst::Ret { value } => {
                    let ty = value
                        .as_ref()
                        .and_then(|v| func.value_type(v))
                        .unwrap_or(TypeId::VOID);
                    if ty != func.ret {
                        return Err(VerifyError::ReturnMismatch(func.name.clone()));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// A value is usable if it is a constant, a valid argument, or a non-void
/// instruction that is not a later instruction of the same block.
fn is_defined(func: &Function, block: &Block, pos: usize, value: &Value) -> bool {
    match value {
        Value::Const(_) => true,
        Value::Arg(i) => (*i as usize) < func.params.len(),
        Value::Inst(id) => {
            if id.index() >= func.insts.len() || func.inst(*id).ty == TypeId::VOID {
                return false;
            }
            match func.blocks.iter().find(|b| b.insts.contains(id)) {
                None => false,
                Some(home) if std::ptr::eq(home, block) => block.insts[..pos].contains(id),
                Some(_) => true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::function::{BlockId, Constant, Function, InstId};
    use super::*;

    fn ret_true() -> Inst {
        Inst::Ret {
            value: Some(Value::Const(Constant::Bool(true))),
        }
    }

    #[test]
    fn test_valid_function() {
        let mut module = Module::new();
        let mut f = Function::new("f", Vec::new(), TypeId::BOOL);
        f.append(BlockId::ENTRY, ret_true(), TypeId::VOID, None);
        let id = module.add_function(f);
        assert_eq!(verify_function(&module, id), Ok(()));
    }

    #[test]
    fn test_missing_terminator() {
        let mut module = Module::new();
        let mut f = Function::new("f", Vec::new(), TypeId::BOOL);
        f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, TypeId::BYTES, None);
        let id = module.add_function(f);
        assert!(matches!(
            verify_function(&module, id),
            Err(VerifyError::MissingTerminator(_))
        ));
    }

    #[test]
    fn test_empty_block() {
        let mut module = Module::new();
        let mut f = Function::new("f", Vec::new(), TypeId::BOOL);
        f.append(BlockId::ENTRY, ret_true(), TypeId::VOID, None);
        f.add_block("dangling");
        let id = module.add_function(f);
        assert_eq!(
            verify_function(&module, id),
            Err(VerifyError::EmptyBlock("dangling".to_string()))
        );
    }

    #[test]
    fn test_return_mismatch() {
        let mut module = Module::new();
        let mut f = Function::new("f", Vec::new(), TypeId::VOID);
        f.append(BlockId::ENTRY, ret_true(), TypeId::VOID, None);
        let id = module.add_function(f);
        assert!(matches!(
            verify_function(&module, id),
            Err(VerifyError::ReturnMismatch(_))
        ));
    }

    #[test]
    fn test_use_before_definition() {
        let mut module = Module::new();
        let mut f = Function::new("f", Vec::new(), TypeId::BOOL);
        // Reference an instruction that appears later in the block.
        f.append(
            BlockId::ENTRY,
            Inst::Load {
                ptr: Value::Inst(InstId(1)),
            },
            TypeId::I32,
            None,
        );
        f.append(BlockId::ENTRY, Inst::Alloca { ty: TypeId::I32 }, TypeId::BYTES, None);
        f.append(BlockId::ENTRY, ret_true(), TypeId::VOID, None);
        let id = module.add_function(f);
        assert!(matches!(
            verify_function(&module, id),
            Err(VerifyError::UndefinedValue(_))
        ));
    }
}
