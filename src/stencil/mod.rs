//! Stencil module for copy-and-patch lowering
//!
//! Contains the precompiled write-slot stencils and their operand format.

pub mod table;

pub use table::{
    write_parsed, write_string, NullPatch, Operands, StencilEntry, StencilFn, StencilKind,
    StencilTable, STENCILS,
};
