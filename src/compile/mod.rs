//! Compilation module
//!
//! Lowers write-slot IR to patched stencils.

pub mod engine;

pub use engine::{check_write_slot_signature, CompileError, Compiler, CompilerStats, WriteSlotFn};
