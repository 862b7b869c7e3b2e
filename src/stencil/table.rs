//! Stencil table for copy-and-patch lowering
//!
//! Each stencil is a write-slot routine compiled ahead of time and
//! monomorphised over the slot's value type. The only things that vary
//! between slots of the same type are the slot offset and the null bit,
//! which are patched in as [`Operands`].

use crate::string_parser::{ParseField, ParseFn, ParseResult};
use crate::tuple::StringValue;
use once_cell::sync::Lazy;
use std::ptr;

/// Signature shared by all stencils: `(operands, tuple, data, len) -> ok`
pub type StencilFn = unsafe fn(&Operands, *mut u8, *const u8, usize) -> bool;

/// Null bit patched into a stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullPatch {
    pub byte_offset: usize,
    pub mask: u8,
}

/// Values patched into a stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operands {
    pub slot_offset: usize,
    pub null: NullPatch,
}

/// Which stencil to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilKind {
    String,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
}

impl StencilKind {
    pub const ALL: [StencilKind; 8] = [
        StencilKind::String,
        StencilKind::Bool,
        StencilKind::Int8,
        StencilKind::Int16,
        StencilKind::Int32,
        StencilKind::Int64,
        StencilKind::Float,
        StencilKind::Double,
    ];

    /// Stencil that stores the output of `parse_fn`
    pub fn for_parser(parse_fn: ParseFn) -> Self {
        match parse_fn {
            ParseFn::StringToBool => StencilKind::Bool,
            ParseFn::StringToInt8 => StencilKind::Int8,
            ParseFn::StringToInt16 => StencilKind::Int16,
            ParseFn::StringToInt32 => StencilKind::Int32,
            ParseFn::StringToInt64 => StencilKind::Int64,
            ParseFn::StringToFloat => StencilKind::Float,
            ParseFn::StringToDouble => StencilKind::Double,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// A precompiled routine
#[derive(Debug, Clone, Copy)]
pub struct StencilEntry {
    pub kind: StencilKind,
    pub name: &'static str,
    pub func: StencilFn,
}

/// All stencils, indexed by [`StencilKind`]
pub struct StencilTable {
    entries: Vec<StencilEntry>,
}

/// Process-wide stencil table
pub static STENCILS: Lazy<StencilTable> = Lazy::new(StencilTable::new);

impl StencilTable {
    pub fn new() -> Self {
        let entries = StencilKind::ALL
            .iter()
            .map(|&kind| {
                let (name, func) = match kind {
                    StencilKind::String => ("write_string", write_string as StencilFn),
                    StencilKind::Bool => ("write_bool", write_parsed::<bool> as StencilFn),
                    StencilKind::Int8 => ("write_i8", write_parsed::<i8> as StencilFn),
                    StencilKind::Int16 => ("write_i16", write_parsed::<i16> as StencilFn),
                    StencilKind::Int32 => ("write_i32", write_parsed::<i32> as StencilFn),
                    StencilKind::Int64 => ("write_i64", write_parsed::<i64> as StencilFn),
                    StencilKind::Float => ("write_f32", write_parsed::<f32> as StencilFn),
                    StencilKind::Double => ("write_f64", write_parsed::<f64> as StencilFn),
                };
                StencilEntry { kind, name, func }
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, kind: StencilKind) -> &StencilEntry {
        &self.entries[kind.index()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StencilTable {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
unsafe fn set_null(ops: &Operands, tuple: *mut u8) {
    let byte = tuple.add(ops.null.byte_offset);
    *byte |= ops.null.mask;
}

/// Stencil for string slots: alias `data` from the slot
///
/// # Safety
/// `tuple` must be valid for writes over the patched offsets; `data` must
/// be valid for `len` bytes whenever the slot is read.
pub unsafe fn write_string(ops: &Operands, tuple: *mut u8, data: *const u8, len: usize) -> bool {
    if len == 0 {
        set_null(ops, tuple);
        return true;
    }
    ptr::write_unaligned(
        tuple.add(ops.slot_offset) as *mut StringValue,
        StringValue { ptr: data, len },
    );
    true
}

/// Stencil for scalar slots: parse and store, or null the slot
///
/// # Safety
/// `tuple` must be valid for writes over the patched offsets; `data` must be
/// valid for reads of `len` bytes.
pub unsafe fn write_parsed<T: ParseField>(
    ops: &Operands,
    tuple: *mut u8,
    data: *const u8,
    len: usize,
) -> bool {
    if len == 0 {
        set_null(ops, tuple);
        return true;
    }
    let field = std::slice::from_raw_parts(data, len);
    let (value, result) = T::parse_field(field);
    if result == ParseResult::Failure {
        set_null(ops, tuple);
        return false;
    }
    ptr::write_unaligned(tuple.add(ops.slot_offset) as *mut T, value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPS: Operands = Operands {
        slot_offset: 8,
        null: NullPatch {
            byte_offset: 0,
            mask: 0b100,
        },
    };

    #[test]
    fn test_table_covers_every_kind() {
        let table = StencilTable::new();
        assert_eq!(table.len(), StencilKind::ALL.len());
        for kind in StencilKind::ALL {
            assert_eq!(table.get(kind).kind, kind);
        }
        assert_eq!(
            STENCILS.get(StencilKind::for_parser(ParseFn::StringToInt32)).name,
            "write_i32"
        );
    }

    #[test]
    fn test_parsed_stencil() {
        let mut tuple = [0u8; 16];
        let text = b"-300";
        let ok = unsafe {
            write_parsed::<i16>(&OPS, tuple.as_mut_ptr(), text.as_ptr(), text.len())
        };
        assert!(ok);
        assert_eq!(i16::from_ne_bytes([tuple[8], tuple[9]]), -300);
        assert_eq!(tuple[0], 0);

        let bad = b"x";
        let ok = unsafe { write_parsed::<i16>(&OPS, tuple.as_mut_ptr(), bad.as_ptr(), 1) };
        assert!(!ok);
        assert_eq!(tuple[0], 0b100);
    }

    #[test]
    fn test_string_stencil_empty_field() {
        let mut tuple = [0u8; 32];
        let ok = unsafe { write_string(&OPS, tuple.as_mut_ptr(), ptr::null(), 0) };
        assert!(ok);
        assert_eq!(tuple[0], 0b100);
        assert!(tuple[8..].iter().all(|b| *b == 0));
    }
}
