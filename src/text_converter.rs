//! Text field conversion
//!
//! [`TextConverter`] turns the raw bytes of one delimited-text field into a
//! tuple slot value. It offers two paths:
//!
//! - [`codegen_write_slot`](TextConverter::codegen_write_slot) builds a
//!   routine specialised to one slot, to be called once per row.
//! - [`write_slot`](TextConverter::write_slot) is the generic path for
//!   everything the generator refuses (escaped strings, timestamps, string
//!   copies, non-nullable slots).
//!
//! It also removes escape markers from string fields.

use crate::codegen::{CodegenBackend, CodegenError, FnPrototype, NamedVariable};
use crate::compile::WriteSlotFn;
use crate::descriptor::{SlotDescriptor, TupleDescriptor};
use crate::ir::{BlockId, Callee, FunctionId, TypeId, Value};
use crate::runtime::MemPool;
use crate::string_parser::{parse_timestamp, ParseField, ParseFn, ParseResult};
use crate::tuple::{StringValue, TupleBuffer};
use crate::types::PrimitiveType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, warn};

/// The configured escape byte, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EscapeConfig(Option<u8>);

impl EscapeConfig {
    pub const fn none() -> Self {
        Self(None)
    }

    pub const fn byte(escape: u8) -> Self {
        Self(Some(escape))
    }

    pub fn escape_byte(&self) -> Option<u8> {
        self.0
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for EscapeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(b) => write!(f, "{:?}", b as char),
            None => write!(f, "none"),
        }
    }
}

/// Converts text fields into slot values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextConverter {
    escape: EscapeConfig,
}

impl TextConverter {
    pub fn new(escape: EscapeConfig) -> Self {
        Self { escape }
    }

    pub fn escape(&self) -> EscapeConfig {
        self.escape
    }

    /// Copy `src` into `dest` with escape markers removed, returning the
    /// number of bytes written.
    ///
    /// An escape byte drops itself and keeps the next byte literally; two
    /// escape bytes in a row leave one. A lone escape byte at the very end
    /// has nothing to protect and is dropped.
    ///
    /// # Panics
    /// If `dest` is shorter than `src`.
    pub fn unescape(&self, src: &[u8], dest: &mut [u8]) -> usize {
        assert!(
            dest.len() >= src.len(),
            "unescape destination holds {} bytes, source has {}",
            dest.len(),
            src.len()
        );
        let Some(escape) = self.escape.escape_byte() else {
            dest[..src.len()].copy_from_slice(src);
            return src.len();
        };
        let mut written = 0;
        let mut escape_next = false;
        for &b in src {
            escape_next = if b == escape { !escape_next } else { false };
            if !escape_next {
                dest[written] = b;
                written += 1;
            }
        }
        written
    }

    /// Unescape `buf` in place and return the new length
    pub fn unescape_in_place(&self, buf: &mut [u8]) -> usize {
        let Some(escape) = self.escape.escape_byte() else {
            return buf.len();
        };
        let mut written = 0;
        let mut escape_next = false;
        for read in 0..buf.len() {
            let b = buf[read];
            escape_next = if b == escape { !escape_next } else { false };
            if !escape_next {
                buf[written] = b;
                written += 1;
            }
        }
        written
    }

    /// Unescape `src` into memory owned by `pool`
    pub fn unescape_to_pool<'p>(&self, src: &[u8], pool: &'p MemPool) -> &'p [u8] {
        let dest = pool.allocate(src.len());
        let len = self.unescape(src, dest);
        &dest[..len]
    }

    /// Replace `value` with an unescaped copy allocated from `pool`.
    ///
    /// # Safety
    /// `value` must reference `value.len` readable bytes. Afterwards it
    /// points into `pool` and is valid until the pool is cleared.
    pub unsafe fn unescape_string(&self, value: &mut StringValue, pool: &MemPool) {
        let unescaped = self.unescape_to_pool(value.as_bytes(), pool);
        *value = StringValue::new(unescaped);
    }

    /// Write one field into `slot` without generated code.
    ///
    /// Empty fields null the slot. String slots alias `data` unless
    /// `need_escape` or `copy_string` asks for a pool copy. Returns false
    /// when the text does not parse as the slot's type, or when the slot
    /// would have to be nulled but is not nullable; in that case the slot
    /// is left untouched.
    pub fn write_slot(
        &self,
        slot: &SlotDescriptor,
        tuple: &mut TupleBuffer,
        data: &[u8],
        copy_string: bool,
        need_escape: bool,
        pool: &MemPool,
    ) -> bool {
        if data.is_empty() {
            return tuple.set_null(slot);
        }
        let offset = slot.tuple_offset();
        match slot.ty() {
            PrimitiveType::String => {
                let value = if need_escape && self.escape.is_enabled() {
                    StringValue::new(self.unescape_to_pool(data, pool))
                } else if copy_string {
                    StringValue::new(pool.copy_from(data))
                } else {
                    StringValue::new(data)
                };
                tuple.write(offset, value);
                true
            }
            PrimitiveType::Timestamp => match parse_timestamp(data) {
                Some(ts) => {
                    tuple.write(offset, ts);
                    true
                }
                None => {
                    tuple.set_null(slot);
                    false
                }
            },
            PrimitiveType::Boolean => write_parsed::<bool>(slot, tuple, data),
            PrimitiveType::TinyInt => write_parsed::<i8>(slot, tuple, data),
            PrimitiveType::SmallInt => write_parsed::<i16>(slot, tuple, data),
            PrimitiveType::Int => write_parsed::<i32>(slot, tuple, data),
            PrimitiveType::BigInt => write_parsed::<i64>(slot, tuple, data),
            PrimitiveType::Float => write_parsed::<f32>(slot, tuple, data),
            PrimitiveType::Double => write_parsed::<f64>(slot, tuple, data),
        }
    }

    /// Generate a write-slot routine for `slot_desc`.
    ///
    /// Returns `None` when the slot cannot be generated: an escaped string
    /// slot, a type without a parser, a non-nullable slot, or any backend
    /// failure. Callers fall back to [`write_slot`](Self::write_slot).
    ///
    /// The routine built for an int slot looks like:
    ///
    /// ```text
    /// define i1 @WriteSlot(%Tuple0* %tuple_arg, i8* %data, usize %len) {
    /// entry:
    ///   %parse_result = alloca i32
    ///   %is_null = icmp eq usize %len, 0
    ///   br i1 %is_null, label %set_null, label %parse_slot
    ///
    /// set_null:
    ///   call void @SetNull(%Tuple0* %tuple_arg)
    ///   ret i1 true
    ///
    /// parse_slot:
    ///   %slot = getelementptr inbounds %Tuple0* %tuple_arg, i32 0, i32 1
    ///   %value = call i32 @IrStringToInt32(i8* %data, usize %len, i32* %parse_result)
    ///   %parse_result1 = load i32* %parse_result
    ///   %failed = icmp eq i32 %parse_result1, 1
    ///   br i1 %failed, label %parse_fail, label %parse_success
    ///
    /// parse_fail:
    ///   call void @SetNull(%Tuple0* %tuple_arg)
    ///   ret i1 false
    ///
    /// parse_success:
    ///   store i32 %value, i32* %slot
    ///   ret i1 true
    /// }
    /// ```
    pub fn codegen_write_slot<B: CodegenBackend + ?Sized>(
        &self,
        codegen: &mut B,
        tuple_desc: &TupleDescriptor,
        slot_desc: &SlotDescriptor,
    ) -> Option<WriteSlotFn> {
        let start = Instant::now();

        if slot_desc.ty().is_string() && self.escape.is_enabled() {
            warn!(
                slot = %slot_desc.id(),
                escape = %self.escape,
                "{}",
                CodegenError::EscapedString
            );
            return None;
        }
        let parse_fn = match slot_desc.ty() {
            PrimitiveType::String => None,
            ty => match parser_for(ty) {
                Some(f) => Some(f),
                None => {
                    error!(slot = %slot_desc.id(), "{}", CodegenError::UnsupportedType(ty));
                    return None;
                }
            },
        };

        let tuple_type = match tuple_desc.generate_struct(codegen) {
            Ok(ty) => ty,
            Err(e) => {
                error!(tuple = tuple_desc.id().0, error = %e, "could not describe tuple layout");
                return None;
            }
        };
        let tuple_ptr_type = codegen.ptr_type(tuple_type);
        let set_null_fn = match slot_desc.codegen_update_null(codegen, tuple_ptr_type, true) {
            Ok(f) => f,
            Err(e) => {
                error!(
                    slot = %slot_desc.id(),
                    error = %e,
                    "could not codegen WriteSlot because slot update codegen failed"
                );
                return None;
            }
        };

        let routine = build_write_slot(codegen, slot_desc, tuple_ptr_type, set_null_fn, parse_fn)
            .and_then(|f| codegen.finalize_function(f));
        match routine {
            Ok(routine) => {
                debug!(
                    slot = %slot_desc.id(),
                    ty = %slot_desc.ty(),
                    compiled = routine.is_compiled(),
                    elapsed_ns = start.elapsed().as_nanos() as u64,
                    "generated write-slot routine"
                );
                Some(routine)
            }
            Err(e) => {
                error!(slot = %slot_desc.id(), error = %e, "write-slot codegen failed");
                None
            }
        }
    }
}

impl Default for TextConverter {
    fn default() -> Self {
        Self::new(EscapeConfig::none())
    }
}

/// Parser used by the generated routine for scalar slots
fn parser_for(ty: PrimitiveType) -> Option<ParseFn> {
    match ty {
        PrimitiveType::Boolean => Some(ParseFn::StringToBool),
        PrimitiveType::TinyInt => Some(ParseFn::StringToInt8),
        PrimitiveType::SmallInt => Some(ParseFn::StringToInt16),
        PrimitiveType::Int => Some(ParseFn::StringToInt32),
        PrimitiveType::BigInt => Some(ParseFn::StringToInt64),
        PrimitiveType::Float => Some(ParseFn::StringToFloat),
        PrimitiveType::Double => Some(ParseFn::StringToDouble),
        PrimitiveType::String | PrimitiveType::Timestamp => None,
    }
}

fn write_parsed<T: ParseField>(slot: &SlotDescriptor, tuple: &mut TupleBuffer, data: &[u8]) -> bool {
    let (value, result) = T::parse_field(data);
    if result == ParseResult::Failure {
        tuple.set_null(slot);
        return false;
    }
    tuple.write(slot.tuple_offset(), value);
    true
}

/// Emit the body of `WriteSlot`; `parse_fn` is `None` for string slots
fn build_write_slot<B: CodegenBackend + ?Sized>(
    codegen: &mut B,
    slot_desc: &SlotDescriptor,
    tuple_ptr_type: TypeId,
    set_null_fn: FunctionId,
    parse_fn: Option<ParseFn>,
) -> Result<FunctionId, CodegenError> {
    let mut prototype = FnPrototype::new("WriteSlot", TypeId::BOOL);
    prototype.add_argument(NamedVariable::new("tuple_arg", tuple_ptr_type));
    prototype.add_argument(NamedVariable::new("data", TypeId::BYTES));
    prototype.add_argument(NamedVariable::new("len", TypeId::USIZE));
    let (func, args) = codegen.declare_function(&prototype)?;
    let (tuple_arg, data, len) = (args[0], args[1], args[2]);

    let (set_null_block, parse_slot_block) =
        codegen.create_if_else_blocks(func, "set_null", "parse_slot")?;

    codegen.set_insert_point(func, BlockId::ENTRY);
    let zero = codegen.int_constant(TypeId::USIZE, 0);
    let is_null = codegen.icmp_eq(len, zero, "is_null")?;
    codegen.cond_br(is_null, set_null_block, parse_slot_block)?;

    codegen.set_insert_point(func, set_null_block);
    mark_null_and_return(codegen, tuple_arg, set_null_fn, true)?;

    codegen.set_insert_point(func, parse_slot_block);
    let slot = codegen.struct_gep(tuple_arg, slot_desc.field_idx(), "slot")?;

    let Some(parse_fn) = parse_fn else {
        let ptr = codegen.struct_gep(slot, 0, "string_ptr")?;
        let ptr_len = codegen.struct_gep(slot, 1, "string_len")?;
        codegen.store(data, ptr)?;
        codegen.store(len, ptr_len)?;
        let ok = codegen.true_value();
        codegen.ret(Some(ok))?;
        return Ok(func);
    };

    let parse_result = codegen
        .create_entry_block_alloca(func, &NamedVariable::new("parse_result", TypeId::I32))?;
    let failed_value = codegen.int_constant(TypeId::I32, ParseResult::Failure as i64);
    let (parse_fail_block, parse_success_block) =
        codegen.create_if_else_blocks(func, "parse_fail", "parse_success")?;

    let parser = codegen.get_parse_function(parse_fn);
    let value = codegen.call(parser, &[data, len, parse_result], "value")?;
    let status = codegen.load(parse_result, "parse_result")?;
    let failed = codegen.icmp_eq(status, failed_value, "failed")?;
    codegen.cond_br(failed, parse_fail_block, parse_success_block)?;

    codegen.set_insert_point(func, parse_success_block);
    codegen.store(value, slot)?;
    let ok = codegen.true_value();
    codegen.ret(Some(ok))?;

    codegen.set_insert_point(func, parse_fail_block);
    mark_null_and_return(codegen, tuple_arg, set_null_fn, false)?;

    Ok(func)
}

fn mark_null_and_return<B: CodegenBackend + ?Sized>(
    codegen: &mut B,
    tuple_arg: Value,
    set_null_fn: FunctionId,
    result: bool,
) -> Result<(), CodegenError> {
    codegen.call(Callee::Function(set_null_fn), &[tuple_arg], "")?;
    let value = if result {
        codegen.true_value()
    } else {
        codegen.false_value()
    };
    codegen.ret(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::SlotCodegen;
    use crate::descriptor::{TupleDescriptorBuilder, TupleId};
    use crate::tuple::Datum;

    fn backslash() -> TextConverter {
        TextConverter::new(EscapeConfig::byte(b'\\'))
    }

    fn unescaped(src: &[u8]) -> Vec<u8> {
        let mut dest = vec![0u8; src.len()];
        let n = backslash().unescape(src, &mut dest);
        dest.truncate(n);
        dest
    }

    #[test]
    fn test_unescape_basic() {
        assert_eq!(unescaped(b"a\\,b"), b"a,b");
        assert_eq!(unescaped(b"a\\\\b"), b"a\\b");
        assert_eq!(unescaped(b"\\\\\\\\"), b"\\\\");
        assert_eq!(unescaped(b"plain"), b"plain");
        assert_eq!(unescaped(b""), b"");
    }

    #[test]
    fn test_unescape_trailing_escape_dropped() {
        assert_eq!(unescaped(b"a\\"), b"a");
        assert_eq!(unescaped(b"\\"), b"");
        assert_eq!(unescaped(b"a\\\\\\"), b"a\\");
    }

    #[test]
    fn test_unescape_in_place_matches_copy() {
        let src = b"x\\\\y\\z\\".to_vec();
        let mut buf = src.clone();
        let n = backslash().unescape_in_place(&mut buf);
        assert_eq!(&buf[..n], unescaped(&src).as_slice());
    }

    #[test]
    fn test_no_escape_is_copy() {
        let conv = TextConverter::default();
        let mut dest = [0u8; 4];
        assert_eq!(conv.unescape(b"a\\b", &mut dest), 3);
        assert_eq!(&dest[..3], b"a\\b");
    }

    #[test]
    fn test_unescape_string_into_pool() {
        let pool = MemPool::new();
        let src = b"tab\\|bed".to_vec();
        let mut value = StringValue::new(&src);
        unsafe {
            backslash().unescape_string(&mut value, &pool);
            assert_eq!(value.as_bytes(), b"tab|bed");
        }
        assert_ne!(value.ptr, src.as_ptr());
        assert_eq!(pool.total_allocated_bytes(), src.len());
    }

    #[test]
    fn test_interpreted_write_slot() {
        let desc = TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::Int, true)
            .add_slot(PrimitiveType::String, true)
            .add_slot(PrimitiveType::Timestamp, true)
            .add_slot(PrimitiveType::BigInt, false)
            .build();
        let conv = backslash();
        let pool = MemPool::new();
        let mut tuple = TupleBuffer::for_descriptor(&desc);
        let slots = desc.slots();

        assert!(conv.write_slot(&slots[0], &mut tuple, b"123", false, false, &pool));
        assert!(conv.write_slot(&slots[1], &mut tuple, b"a\\,b", false, true, &pool));
        assert!(conv.write_slot(&slots[2], &mut tuple, b"2020-02-29 12:00:00", false, false, &pool));
        unsafe {
            assert_eq!(tuple.datum(&slots[0]), Datum::Int(123));
            assert_eq!(tuple.datum(&slots[1]), Datum::String(b"a,b"));
            assert!(matches!(tuple.datum(&slots[2]), Datum::Timestamp(_)));
        }

        assert!(!conv.write_slot(&slots[0], &mut tuple, b"12x", false, false, &pool));
        assert!(tuple.is_null(&slots[0]));

        // Non-nullable: empty and bad fields fail and leave the value alone.
        assert!(conv.write_slot(&slots[3], &mut tuple, b"9", false, false, &pool));
        assert!(!conv.write_slot(&slots[3], &mut tuple, b"", false, false, &pool));
        assert!(!conv.write_slot(&slots[3], &mut tuple, b"nine", false, false, &pool));
        unsafe {
            assert_eq!(tuple.datum(&slots[3]), Datum::BigInt(9));
        }
    }

    #[test]
    fn test_codegen_int_listing() {
        let desc = TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::Boolean, true)
            .add_slot(PrimitiveType::Int, true)
            .build();
        let mut codegen = SlotCodegen::new();
        let routine = TextConverter::default()
            .codegen_write_slot(&mut codegen, &desc, &desc.slots()[1])
            .unwrap();
        assert!(routine.is_compiled());

        let id = codegen.module().find_function("WriteSlot").unwrap();
        let text = codegen.module().display_function(id).unwrap().to_string();
        assert!(text.starts_with("define i1 @WriteSlot(%Tuple0* %tuple_arg, i8* %data, usize %len) {"));
        assert!(text.contains("  %parse_result = alloca i32\n  %is_null = icmp eq usize %len, 0\n"));
        assert!(text.contains("call i32 @IrStringToInt32(i8* %data, usize %len, i32* %parse_result)"));
        assert!(text.contains("%failed = icmp eq i32 %parse_result1, 1"));
        assert!(text.contains("parse_fail:\n  call void @SetNull(%Tuple0* %tuple_arg)\n  ret i1 false"));
    }

    #[test]
    fn test_codegen_refusals() {
        let desc = TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::String, true)
            .add_slot(PrimitiveType::Timestamp, true)
            .add_slot(PrimitiveType::Int, false)
            .add_slot(PrimitiveType::Double, true)
            .build();
        let mut codegen = SlotCodegen::new();
        let slots = desc.slots();

        assert!(backslash()
            .codegen_write_slot(&mut codegen, &desc, &slots[0])
            .is_none());
        assert!(TextConverter::default()
            .codegen_write_slot(&mut codegen, &desc, &slots[0])
            .is_some());
        assert!(TextConverter::default()
            .codegen_write_slot(&mut codegen, &desc, &slots[1])
            .is_none());
        assert!(TextConverter::default()
            .codegen_write_slot(&mut codegen, &desc, &slots[2])
            .is_none());
        // Escaping only affects string slots.
        assert!(backslash()
            .codegen_write_slot(&mut codegen, &desc, &slots[3])
            .is_some());
    }
}
