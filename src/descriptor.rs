//! Tuple and slot descriptors
//!
//! A [`TupleDescriptor`] fixes where every slot and every null bit lives in
//! a row's memory. Descriptors are immutable once built and are shared by
//! every routine generated against them.

use crate::codegen::{CodegenBackend, CodegenError, FnPrototype, NamedVariable};
use crate::ir::{BlockId, FunctionId, StructField, StructType, TypeId};
use crate::types::{PrimitiveType, UnknownTypeError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of a slot's null bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullIndicatorOffset {
    /// Byte within the tuple holding the bit
    pub byte_offset: usize,
    pub bit_mask: u8,
    /// Index of the null byte in the tuple's struct description
    pub field_idx: u32,
}

/// One slot of a tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotDescriptor {
    id: SlotId,
    col_pos: usize,
    ty: PrimitiveType,
    tuple_offset: usize,
    field_idx: u32,
    null_indicator: Option<NullIndicatorOffset>,
}

impl SlotDescriptor {
    /// Describe a slot whose position was decided elsewhere
    pub fn new(
        id: SlotId,
        col_pos: usize,
        ty: PrimitiveType,
        tuple_offset: usize,
        field_idx: u32,
        null_indicator: Option<NullIndicatorOffset>,
    ) -> Self {
        Self {
            id,
            col_pos,
            ty,
            tuple_offset,
            field_idx,
            null_indicator,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Column of the text row this slot is filled from
    pub fn col_pos(&self) -> usize {
        self.col_pos
    }

    pub fn ty(&self) -> PrimitiveType {
        self.ty
    }

    pub fn tuple_offset(&self) -> usize {
        self.tuple_offset
    }

    pub fn field_idx(&self) -> u32 {
        self.field_idx
    }

    pub fn null_indicator(&self) -> Option<NullIndicatorOffset> {
        self.null_indicator
    }

    pub fn is_nullable(&self) -> bool {
        self.null_indicator.is_some()
    }

    /// Generate a function `void(tuple*)` that sets (or clears) this slot's
    /// null bit.
    pub fn codegen_update_null<B: CodegenBackend + ?Sized>(
        &self,
        codegen: &mut B,
        tuple_ptr_type: TypeId,
        set_null: bool,
    ) -> Result<FunctionId, CodegenError> {
        let null = self
            .null_indicator
            .ok_or(CodegenError::NotNullable(self.id))?;

        let name = if set_null { "SetNull" } else { "SetNotNull" };
        let mut prototype = FnPrototype::new(name, TypeId::VOID);
        prototype.add_argument(NamedVariable::new("tuple_arg", tuple_ptr_type));
        let (func, args) = codegen.declare_function(&prototype)?;
        codegen.set_insert_point(func, BlockId::ENTRY);

        let byte_ptr = codegen.struct_gep(args[0], null.field_idx, "null_byte_ptr")?;
        let byte = codegen.load(byte_ptr, "null_byte")?;
        let updated = if set_null {
            let mask = codegen.int_constant(TypeId::I8, null.bit_mask as i8 as i64);
            codegen.or(byte, mask, "null_bit_set")?
        } else {
            let mask = codegen.int_constant(TypeId::I8, !null.bit_mask as i8 as i64);
            codegen.and(byte, mask, "null_bit_cleared")?
        };
        codegen.store(updated, byte_ptr)?;
        codegen.ret(None)?;
        Ok(func)
    }
}

/// Memory layout of one tuple.
///
/// Equality and hashing cover the whole layout, not just the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleDescriptor {
    id: TupleId,
    byte_size: usize,
    slots: Vec<SlotDescriptor>,
}

impl TupleDescriptor {
    /// Wrap a layout decided elsewhere. It is validated lazily by
    /// [`generate_struct`](Self::generate_struct).
    pub fn new(id: TupleId, byte_size: usize, slots: Vec<SlotDescriptor>) -> Self {
        Self {
            id,
            byte_size,
            slots,
        }
    }

    pub fn id(&self) -> TupleId {
        self.id
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotDescriptor> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Register the tuple as a struct type with the backend.
    ///
    /// Slot fields and null bytes are laid out at their recorded offsets;
    /// every struct field index must be covered exactly once and no two
    /// fields may overlap.
    pub fn generate_struct<B: CodegenBackend + ?Sized>(
        &self,
        codegen: &mut B,
    ) -> Result<TypeId, CodegenError> {
        let mut fields: Vec<Option<(StructField, usize)>> = Vec::new();

        let mut place = |idx: u32, field: StructField, size: usize| -> Result<(), CodegenError> {
            let idx = idx as usize;
            if fields.len() <= idx {
                fields.resize(idx + 1, None);
            }
            let current = fields[idx];
            match current {
                None => {
                    fields[idx] = Some((field, size));
                    Ok(())
                }
                Some((existing, _)) if existing == field => Ok(()),
                Some(_) => Err(CodegenError::InvalidLayout(format!(
                    "struct field {} assigned twice",
                    idx
                ))),
            }
        };

        for slot in &self.slots {
            let ty = codegen.get_type(slot.ty);
            let size = slot.ty.slot_size();
            if slot.tuple_offset % slot.ty.slot_align() != 0 {
                return Err(CodegenError::InvalidLayout(format!(
                    "slot {} at offset {} is misaligned for {}",
                    slot.id, slot.tuple_offset, slot.ty
                )));
            }
            place(
                slot.field_idx,
                StructField {
                    ty,
                    offset: slot.tuple_offset,
                },
                size,
            )?;
            if let Some(null) = slot.null_indicator {
                if null.bit_mask == 0 {
                    return Err(CodegenError::InvalidLayout(format!(
                        "slot {} has an empty null bit mask",
                        slot.id
                    )));
                }
                place(
                    null.field_idx,
                    StructField {
                        ty: TypeId::I8,
                        offset: null.byte_offset,
                    },
                    1,
                )?;
            }
        }

        let mut placed = Vec::with_capacity(fields.len());
        for (idx, entry) in fields.into_iter().enumerate() {
            let (field, size) = entry.ok_or_else(|| {
                CodegenError::InvalidLayout(format!("struct field {} is not described", idx))
            })?;
            if field.offset + size > self.byte_size {
                return Err(CodegenError::InvalidLayout(format!(
                    "struct field {} ends past the tuple size {}",
                    idx, self.byte_size
                )));
            }
            placed.push((field, size));
        }

        let mut spans: Vec<(usize, usize)> = placed.iter().map(|(f, s)| (f.offset, *s)).collect();
        spans.sort_unstable();
        if spans.windows(2).any(|w| w[0].0 + w[0].1 > w[1].0) {
            return Err(CodegenError::InvalidLayout(
                "struct fields overlap".to_string(),
            ));
        }

        codegen.declare_struct(StructType {
            name: format!("Tuple{}", self.id.0),
            fields: placed.into_iter().map(|(f, _)| f).collect(),
            size: self.byte_size,
        })
    }
}

/// Computes a packed, naturally aligned layout for a list of columns.
///
/// Slots are placed by descending size, followed by one null bit per
/// nullable slot. Slot ids and column positions follow insertion order.
pub struct TupleDescriptorBuilder {
    id: TupleId,
    columns: Vec<(PrimitiveType, bool)>,
}

impl TupleDescriptorBuilder {
    pub fn new(id: TupleId) -> Self {
        Self {
            id,
            columns: Vec::new(),
        }
    }

    pub fn add_slot(&mut self, ty: PrimitiveType, nullable: bool) -> &mut Self {
        self.columns.push((ty, nullable));
        self
    }

    /// Parse a comma separated column list such as `int,string!,double`.
    ///
    /// A trailing `!` marks a column as not nullable.
    pub fn from_schema(id: TupleId, schema: &str) -> Result<Self, UnknownTypeError> {
        let mut builder = Self::new(id);
        for column in schema.split(',') {
            let column = column.trim();
            let (name, nullable) = match column.strip_suffix('!') {
                Some(name) => (name, false),
                None => (column, true),
            };
            builder.add_slot(name.parse()?, nullable);
        }
        Ok(builder)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn build(&self) -> TupleDescriptor {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        // Stable sort keeps column order among equal sizes.
        order.sort_by(|a, b| {
            self.columns[*b]
                .0
                .slot_size()
                .cmp(&self.columns[*a].0.slot_size())
        });

        let mut offsets = vec![(0usize, 0u32); self.columns.len()];
        let mut offset = 0;
        for (field_idx, &col) in order.iter().enumerate() {
            offsets[col] = (offset, field_idx as u32);
            offset += self.columns[col].0.slot_size();
        }

        let null_bytes_offset = offset;
        let num_slot_fields = self.columns.len() as u32;
        let mut nullable_seen = 0usize;
        let slots: Vec<SlotDescriptor> = self
            .columns
            .iter()
            .enumerate()
            .map(|(col, &(ty, nullable))| {
                let null_indicator = nullable.then(|| {
                    let byte = nullable_seen / 8;
                    let bit = nullable_seen % 8;
                    nullable_seen += 1;
                    NullIndicatorOffset {
                        byte_offset: null_bytes_offset + byte,
                        bit_mask: 1 << bit,
                        field_idx: num_slot_fields + byte as u32,
                    }
                });
                SlotDescriptor::new(
                    SlotId(col as u32),
                    col,
                    ty,
                    offsets[col].0,
                    offsets[col].1,
                    null_indicator,
                )
            })
            .collect();

        let num_null_bytes = nullable_seen.div_ceil(8);
        TupleDescriptor::new(self.id, null_bytes_offset + num_null_bytes, slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::SlotCodegen;

    fn sample() -> TupleDescriptor {
        TupleDescriptorBuilder::new(TupleId(0))
            .add_slot(PrimitiveType::Boolean, true)
            .add_slot(PrimitiveType::Int, true)
            .add_slot(PrimitiveType::String, false)
            .add_slot(PrimitiveType::Double, true)
            .build()
    }

    #[test]
    fn test_builder_layout() {
        let desc = sample();
        let slots = desc.slots();
        // string(16) @0, double(8) @16, int(4) @24, bool(1) @28, null byte @29
        assert_eq!(slots[2].tuple_offset(), 0);
        assert_eq!(slots[3].tuple_offset(), 16);
        assert_eq!(slots[1].tuple_offset(), 24);
        assert_eq!(slots[0].tuple_offset(), 28);
        assert_eq!(desc.byte_size(), 30);

        assert_eq!(slots[0].null_indicator().unwrap().bit_mask, 0b001);
        assert_eq!(slots[1].null_indicator().unwrap().bit_mask, 0b010);
        assert_eq!(slots[3].null_indicator().unwrap().bit_mask, 0b100);
        assert!(slots[2].null_indicator().is_none());
        assert_eq!(slots[0].null_indicator().unwrap().byte_offset, 29);
    }

    #[test]
    fn test_builder_many_nullable_slots() {
        let mut builder = TupleDescriptorBuilder::new(TupleId(1));
        for _ in 0..9 {
            builder.add_slot(PrimitiveType::TinyInt, true);
        }
        let desc = builder.build();
        assert_eq!(desc.byte_size(), 9 + 2);
        let last = desc.slots()[8].null_indicator().unwrap();
        assert_eq!(last.byte_offset, 10);
        assert_eq!(last.bit_mask, 1);
        assert_eq!(last.field_idx, 10);
    }

    #[test]
    fn test_from_schema() {
        let builder = TupleDescriptorBuilder::from_schema(TupleId(2), "int, string!,double").unwrap();
        assert_eq!(builder.len(), 3);
        let desc = builder.build();
        assert_eq!(desc.slots()[1].ty(), PrimitiveType::String);
        assert!(!desc.slots()[1].is_nullable());
        assert!(desc.slots()[2].is_nullable());

        let err = TupleDescriptorBuilder::from_schema(TupleId(2), "int,decimal").err();
        assert_eq!(err, Some(UnknownTypeError("decimal".to_string())));
    }

    #[test]
    fn test_generate_struct() {
        let desc = sample();
        let mut codegen = SlotCodegen::new();
        let ty = desc.generate_struct(&mut codegen).unwrap();
        let st = codegen.module().types.struct_type(ty).unwrap();
        assert_eq!(st.size, 30);
        assert_eq!(st.fields.len(), 5);
        assert_eq!(st.fields[0].ty, TypeId::STRING_VALUE);
        assert_eq!(st.fields[4].ty, TypeId::I8);
        assert_eq!(st.fields[4].offset, 29);
    }

    #[test]
    fn test_generate_struct_rejects_overlap() {
        let slots = vec![
            SlotDescriptor::new(SlotId(0), 0, PrimitiveType::Int, 0, 0, None),
            SlotDescriptor::new(SlotId(1), 1, PrimitiveType::SmallInt, 2, 1, None),
        ];
        let desc = TupleDescriptor::new(TupleId(0), 8, slots);
        let mut codegen = SlotCodegen::new();
        assert!(matches!(
            desc.generate_struct(&mut codegen),
            Err(CodegenError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_generate_struct_rejects_out_of_bounds() {
        let slots = vec![SlotDescriptor::new(
            SlotId(0),
            0,
            PrimitiveType::BigInt,
            8,
            0,
            None,
        )];
        let desc = TupleDescriptor::new(TupleId(0), 12, slots);
        let mut codegen = SlotCodegen::new();
        assert!(matches!(
            desc.generate_struct(&mut codegen),
            Err(CodegenError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_update_null_requires_nullable_slot() {
        let desc = sample();
        let mut codegen = SlotCodegen::new();
        let tuple_ty = desc.generate_struct(&mut codegen).unwrap();
        let ptr = codegen.ptr_type(tuple_ty);
        let result = desc.slots()[2].codegen_update_null(&mut codegen, ptr, true);
        assert_eq!(result, Err(CodegenError::NotNullable(SlotId(2))));
        assert!(desc.slots()[1]
            .codegen_update_null(&mut codegen, ptr, true)
            .is_ok());
    }
}
