//! Logical slot types
//!
//! The set of column types a text field can be converted into.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Logical type of a tuple slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Variable-length string, stored as a (pointer, length) pair
    String,
    /// Date and time of day, stored as a 16-byte value
    Timestamp,
}

impl PrimitiveType {
    /// Every logical type, in declaration order
    pub const ALL: [PrimitiveType; 9] = [
        PrimitiveType::Boolean,
        PrimitiveType::TinyInt,
        PrimitiveType::SmallInt,
        PrimitiveType::Int,
        PrimitiveType::BigInt,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::String,
        PrimitiveType::Timestamp,
    ];

    /// Size of the slot in tuple memory
    pub const fn slot_size(&self) -> usize {
        match self {
            PrimitiveType::Boolean | PrimitiveType::TinyInt => 1,
            PrimitiveType::SmallInt => 2,
            PrimitiveType::Int | PrimitiveType::Float => 4,
            PrimitiveType::BigInt | PrimitiveType::Double => 8,
            PrimitiveType::String | PrimitiveType::Timestamp => 16,
        }
    }

    /// Required alignment of the slot in tuple memory
    pub const fn slot_align(&self) -> usize {
        match self {
            PrimitiveType::String | PrimitiveType::Timestamp => 8,
            other => other.slot_size(),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, PrimitiveType::String)
    }

    /// Whether the value is a fixed-width number or boolean parsed from text
    pub fn is_scalar(&self) -> bool {
        !matches!(self, PrimitiveType::String | PrimitiveType::Timestamp)
    }

    /// Lowercase SQL-ish name
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::TinyInt => "tinyint",
            PrimitiveType::SmallInt => "smallint",
            PrimitiveType::Int => "int",
            PrimitiveType::BigInt => "bigint",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "string",
            PrimitiveType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown type name: {0}")]
pub struct UnknownTypeError(pub String);

impl FromStr for PrimitiveType {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(PrimitiveType::Boolean),
            "tinyint" | "i8" => Ok(PrimitiveType::TinyInt),
            "smallint" | "i16" => Ok(PrimitiveType::SmallInt),
            "int" | "integer" | "i32" => Ok(PrimitiveType::Int),
            "bigint" | "i64" => Ok(PrimitiveType::BigInt),
            "float" | "f32" => Ok(PrimitiveType::Float),
            "double" | "f64" => Ok(PrimitiveType::Double),
            "string" | "varchar" => Ok(PrimitiveType::String),
            "timestamp" => Ok(PrimitiveType::Timestamp),
            other => Err(UnknownTypeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_sizes() {
        assert_eq!(PrimitiveType::Boolean.slot_size(), 1);
        assert_eq!(PrimitiveType::SmallInt.slot_size(), 2);
        assert_eq!(PrimitiveType::Float.slot_size(), 4);
        assert_eq!(PrimitiveType::BigInt.slot_size(), 8);
        assert_eq!(PrimitiveType::String.slot_size(), 16);
        assert_eq!(PrimitiveType::String.slot_align(), 8);
    }

    #[test]
    fn test_parse_names() {
        for ty in PrimitiveType::ALL {
            assert_eq!(ty.name().parse::<PrimitiveType>(), Ok(ty));
        }
        assert_eq!("BOOL".parse::<PrimitiveType>(), Ok(PrimitiveType::Boolean));
        assert!("decimal".parse::<PrimitiveType>().is_err());
    }
}
