//! Tuple memory
//!
//! [`TupleBuffer`] is the raw, fixed-size row storage that write-slot
//! routines fill in. String slots hold a [`StringValue`], a pointer/length
//! pair that aliases memory owned by someone else (the scan buffer or a
//! batch [`MemPool`](crate::runtime::MemPool)). The tuple does not keep that
//! memory alive; whoever reads a string slot must know it still is.

use crate::descriptor::{SlotDescriptor, TupleDescriptor};
use crate::types::PrimitiveType;
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value as JsonValue};
use std::mem;
use std::ptr;

/// In-tuple representation of a string slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringValue {
    pub ptr: *const u8,
    pub len: usize,
}

impl StringValue {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// View the referenced bytes.
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes that outlive `'a`.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

impl Default for StringValue {
    fn default() -> Self {
        Self {
            ptr: ptr::null(),
            len: 0,
        }
    }
}

/// In-tuple representation of a timestamp slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampValue {
    pub time_of_day_ns: i64,
    pub days_since_epoch: i32,
}

impl TimestampValue {
    /// Render as `YYYY-MM-DD HH:MM:SS[.fffffffff]`
    pub fn to_text(&self) -> Option<String> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        let date = epoch.checked_add_signed(Duration::days(self.days_since_epoch as i64))?;
        let datetime = date
            .and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::nanoseconds(self.time_of_day_ns))?;
        Some(datetime.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

/// Owned memory for one tuple.
///
/// Backed by `u64` words so every slot offset produced by the layout
/// builder is naturally aligned.
#[derive(Debug, Clone)]
pub struct TupleBuffer {
    words: Vec<u64>,
    byte_size: usize,
}

impl TupleBuffer {
    /// Allocate zeroed memory for `byte_size` bytes
    pub fn new(byte_size: usize) -> Self {
        Self {
            words: vec![0; byte_size.div_ceil(8).max(1)],
            byte_size,
        }
    }

    pub fn for_descriptor(desc: &TupleDescriptor) -> Self {
        Self::new(desc.byte_size())
    }

    /// Zero the tuple so it can be reused for the next row
    pub fn init(&mut self) {
        self.words.fill(0);
    }

    pub fn len(&self) -> usize {
        self.byte_size
    }

    pub fn is_empty(&self) -> bool {
        self.byte_size == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.byte_size) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.byte_size) }
    }

    pub fn is_null(&self, slot: &SlotDescriptor) -> bool {
        slot.null_indicator()
            .is_some_and(|n| self.as_bytes()[n.byte_offset] & n.bit_mask != 0)
    }

    /// Set the slot's null bit; returns false if the slot is not nullable
    pub fn set_null(&mut self, slot: &SlotDescriptor) -> bool {
        match slot.null_indicator() {
            Some(n) => {
                self.as_bytes_mut()[n.byte_offset] |= n.bit_mask;
                true
            }
            None => false,
        }
    }

    pub fn set_not_null(&mut self, slot: &SlotDescriptor) {
        if let Some(n) = slot.null_indicator() {
            self.as_bytes_mut()[n.byte_offset] &= !n.bit_mask;
        }
    }

    /// Write a plain value at `offset`
    pub fn write<T: Copy>(&mut self, offset: usize, value: T) {
        assert!(offset + mem::size_of::<T>() <= self.byte_size);
        unsafe { ptr::write_unaligned(self.as_mut_ptr().add(offset) as *mut T, value) }
    }

    /// Read a plain value at `offset`
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        assert!(offset + mem::size_of::<T>() <= self.byte_size);
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const T) }
    }

    pub fn string_value(&self, slot: &SlotDescriptor) -> StringValue {
        self.read(slot.tuple_offset())
    }

    /// Decode a slot.
    ///
    /// # Safety
    /// For string slots, the stored pointer must still reference live
    /// memory for the lifetime of the returned datum.
    pub unsafe fn datum(&self, slot: &SlotDescriptor) -> Datum<'_> {
        if self.is_null(slot) {
            return Datum::Null;
        }
        let offset = slot.tuple_offset();
        match slot.ty() {
            PrimitiveType::Boolean => Datum::Boolean(self.read::<u8>(offset) != 0),
            PrimitiveType::TinyInt => Datum::TinyInt(self.read(offset)),
            PrimitiveType::SmallInt => Datum::SmallInt(self.read(offset)),
            PrimitiveType::Int => Datum::Int(self.read(offset)),
            PrimitiveType::BigInt => Datum::BigInt(self.read(offset)),
            PrimitiveType::Float => Datum::Float(self.read(offset)),
            PrimitiveType::Double => Datum::Double(self.read(offset)),
            PrimitiveType::String => Datum::String(self.string_value(slot).as_bytes()),
            PrimitiveType::Timestamp => Datum::Timestamp(self.read(offset)),
        }
    }
}

/// A decoded slot value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Datum<'a> {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(&'a [u8]),
    Timestamp(TimestampValue),
}

impl Datum<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Datum::Null => JsonValue::Null,
            Datum::Boolean(v) => json!(v),
            Datum::TinyInt(v) => json!(v),
            Datum::SmallInt(v) => json!(v),
            Datum::Int(v) => json!(v),
            Datum::BigInt(v) => json!(v),
            Datum::Float(v) => json!(v),
            Datum::Double(v) => json!(v),
            Datum::String(bytes) => json!(String::from_utf8_lossy(bytes)),
            Datum::Timestamp(ts) => ts.to_text().map_or(JsonValue::Null, |t| json!(t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TupleDescriptorBuilder, TupleId};

    fn desc() -> TupleDescriptor {
        TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::Int, true)
            .add_slot(PrimitiveType::String, true)
            .add_slot(PrimitiveType::Boolean, false)
            .build()
    }

    #[test]
    fn test_string_value_layout() {
        assert_eq!(mem::size_of::<StringValue>(), 16);
        assert_eq!(mem::size_of::<TimestampValue>(), 16);
    }

    #[test]
    fn test_null_bits() {
        let desc = desc();
        let mut tuple = TupleBuffer::for_descriptor(&desc);
        let int_slot = &desc.slots()[0];
        let bool_slot = &desc.slots()[2];

        assert!(!tuple.is_null(int_slot));
        assert!(tuple.set_null(int_slot));
        assert!(tuple.is_null(int_slot));
        tuple.set_not_null(int_slot);
        assert!(!tuple.is_null(int_slot));

        assert!(!tuple.set_null(bool_slot));
        assert!(!tuple.is_null(bool_slot));
    }

    #[test]
    fn test_datum_roundtrip() {
        let desc = desc();
        let mut tuple = TupleBuffer::for_descriptor(&desc);
        let text = b"hello".to_vec();
        tuple.write(desc.slots()[0].tuple_offset(), 42i32);
        tuple.write(desc.slots()[1].tuple_offset(), StringValue::new(&text));

        unsafe {
            assert_eq!(tuple.datum(&desc.slots()[0]), Datum::Int(42));
            assert_eq!(tuple.datum(&desc.slots()[1]), Datum::String(b"hello"));
            assert_eq!(tuple.datum(&desc.slots()[2]), Datum::Boolean(false));
        }

        tuple.init();
        tuple.set_null(&desc.slots()[1]);
        unsafe {
            assert!(tuple.datum(&desc.slots()[1]).is_null());
        }
    }

    #[test]
    fn test_timestamp_text() {
        let ts = TimestampValue {
            time_of_day_ns: 3_661_000_000_000,
            days_since_epoch: 1,
        };
        assert_eq!(ts.to_text().as_deref(), Some("1970-01-02 01:01:01"));
        assert_eq!(
            Datum::Timestamp(ts).to_json(),
            json!("1970-01-02 01:01:01")
        );
    }
}
