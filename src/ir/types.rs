//! IR type table
//!
//! Types are interned per module and referenced by [`TypeId`]. The scalar
//! types and the two fixed-layout value structs are registered up front so
//! they have stable ids.

use std::mem;

/// Handle to an interned type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const I8: TypeId = TypeId(2);
    pub const I16: TypeId = TypeId(3);
    pub const I32: TypeId = TypeId(4);
    pub const I64: TypeId = TypeId(5);
    pub const F32: TypeId = TypeId(6);
    pub const F64: TypeId = TypeId(7);
    pub const USIZE: TypeId = TypeId(8);
    /// Pointer to raw bytes (`i8*`)
    pub const BYTES: TypeId = TypeId(9);
    /// `{ i8*, usize }`
    pub const STRING_VALUE: TypeId = TypeId(10);
    /// `{ i64, i32 }`
    pub const TIMESTAMP_VALUE: TypeId = TypeId(11);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Shape of an interned type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Int(u8),
    Float(u8),
    Usize,
    Ptr(TypeId),
    Struct(StructType),
}

/// A struct with explicit field offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructField {
    pub ty: TypeId,
    pub offset: usize,
}

/// Interned types of one module
#[derive(Debug, Clone)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self { kinds: Vec::new() };
        table.kinds.push(TypeKind::Void);
        table.kinds.push(TypeKind::Bool);
        table.kinds.push(TypeKind::Int(8));
        table.kinds.push(TypeKind::Int(16));
        table.kinds.push(TypeKind::Int(32));
        table.kinds.push(TypeKind::Int(64));
        table.kinds.push(TypeKind::Float(32));
        table.kinds.push(TypeKind::Float(64));
        table.kinds.push(TypeKind::Usize);
        table.kinds.push(TypeKind::Ptr(TypeId::I8));
        table.kinds.push(TypeKind::Struct(StructType {
            name: "StringValue".to_string(),
            fields: vec![
                StructField {
                    ty: TypeId::BYTES,
                    offset: 0,
                },
                StructField {
                    ty: TypeId::USIZE,
                    offset: mem::size_of::<*const u8>(),
                },
            ],
            size: 16,
        }));
        table.kinds.push(TypeKind::Struct(StructType {
            name: "TimestampValue".to_string(),
            fields: vec![
                StructField {
                    ty: TypeId::I64,
                    offset: 0,
                },
                StructField {
                    ty: TypeId::I32,
                    offset: 8,
                },
            ],
            size: 16,
        }));
        table
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    pub fn contains(&self, id: TypeId) -> bool {
        id.index() < self.kinds.len()
    }

    /// Intern a pointer to `pointee`
    pub fn ptr_to(&mut self, pointee: TypeId) -> TypeId {
        let kind = TypeKind::Ptr(pointee);
        if let Some(pos) = self.kinds.iter().position(|k| *k == kind) {
            return TypeId(pos as u32);
        }
        self.kinds.push(kind);
        TypeId((self.kinds.len() - 1) as u32)
    }

    /// Register a struct type. Structs are nominal and never deduplicated.
    pub fn add_struct(&mut self, st: StructType) -> TypeId {
        self.kinds.push(TypeKind::Struct(st));
        TypeId((self.kinds.len() - 1) as u32)
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Ptr(inner) => Some(*inner),
            _ => None,
        }
    }

    pub fn struct_type(&self, id: TypeId) -> Option<&StructType> {
        match self.kind(id) {
            TypeKind::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Int(_) | TypeKind::Bool | TypeKind::Usize
        )
    }

    pub fn size_of(&self, id: TypeId) -> usize {
        match self.kind(id) {
            TypeKind::Void => 0,
            TypeKind::Bool => 1,
            TypeKind::Int(bits) | TypeKind::Float(bits) => (*bits as usize) / 8,
            TypeKind::Usize => mem::size_of::<usize>(),
            TypeKind::Ptr(_) => mem::size_of::<*const u8>(),
            TypeKind::Struct(st) => st.size,
        }
    }

    pub fn align_of(&self, id: TypeId) -> usize {
        match self.kind(id) {
            TypeKind::Void => 1,
            TypeKind::Struct(st) => st
                .fields
                .iter()
                .map(|f| self.align_of(f.ty))
                .max()
                .unwrap_or(1),
            _ => self.size_of(id),
        }
    }

    /// Textual name used by the IR printer
    pub fn name(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Void => "void".to_string(),
            TypeKind::Bool => "i1".to_string(),
            TypeKind::Int(bits) => format!("i{}", bits),
            TypeKind::Float(32) => "float".to_string(),
            TypeKind::Float(_) => "double".to_string(),
            TypeKind::Usize => "usize".to_string(),
            TypeKind::Ptr(inner) => format!("{}*", self.name(*inner)),
            TypeKind::Struct(st) if !st.name.is_empty() => format!("%{}", st.name),
            TypeKind::Struct(st) => {
                let fields: Vec<String> = st.fields.iter().map(|f| self.name(f.ty)).collect();
                format!("{{ {} }}", fields.join(", "))
            }
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}
