//! Slotgen - Text Field to Tuple Slot Conversion
//!
//! Converts fields of delimited text into typed slots of a fixed-layout
//! row. Each slot is written either by a general interpreted path or by a
//! small routine generated for that exact slot and layout.
//!
//! # Features
//!
//! - **Unescaper**: collapses escape bytes in a field, copying or in place
//! - **Slot-writer generator**: emits a typed IR routine per slot through a
//!   pluggable [`CodegenBackend`](codegen::CodegenBackend)
//! - **Copy-and-patch lowering**: recognised routines are patched into
//!   pre-built stencils; anything else runs on the IR interpreter
//! - **Scanner**: splits rows and fields, shares generated routines across
//!   worker threads, and records per-field parse errors
//!
//! # Example
//!
//! ```rust
//! use slotgen::codegen::SlotCodegen;
//! use slotgen::descriptor::{TupleDescriptorBuilder, TupleId};
//! use slotgen::text_converter::{EscapeConfig, TextConverter};
//! use slotgen::tuple::{Datum, TupleBuffer};
//! use slotgen::types::PrimitiveType;
//!
//! let desc = TupleDescriptorBuilder::new(TupleId(0))
//!     .add_slot(PrimitiveType::Int, true)
//!     .build();
//! let slot = &desc.slots()[0];
//!
//! let converter = TextConverter::new(EscapeConfig::none());
//! let mut codegen = SlotCodegen::new();
//! let write_slot = converter.codegen_write_slot(&mut codegen, &desc, slot).unwrap();
//!
//! let mut tuple = TupleBuffer::for_descriptor(&desc);
//! assert!(write_slot.write(&mut tuple, b"42"));
//! assert_eq!(unsafe { tuple.datum(slot) }, Datum::Int(42));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ TupleDescriptor  │  slot offsets, null bits
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  TextConverter   │  codegen_write_slot
//! └────────┬─────────┘
//!          │ IR
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌──────────┐
//! │Compiler│ │  Interp  │
//! └───┬────┘ └────┬─────┘
//!     └─────┬─────┘
//!           ▼
//!     ┌───────────┐
//!     │WriteSlotFn│  (tuple, data, len) -> bool
//!     └───────────┘
//! ```

#![warn(clippy::all)]

pub mod codegen;
pub mod compile;
pub mod config;
pub mod descriptor;
pub mod interp;
pub mod ir;
pub mod runtime;
pub mod scan;
pub mod stencil;
pub mod string_parser;
pub mod text_converter;
pub mod tuple;
pub mod types;

// Re-export commonly used types
pub use codegen::{CodegenBackend, CodegenError, ExecutionMode, SlotCodegen};
pub use compile::{CompileError, Compiler, WriteSlotFn};
pub use config::{ConfigError, ConverterConfig};
pub use descriptor::{SlotDescriptor, SlotId, TupleDescriptor, TupleDescriptorBuilder, TupleId};
pub use runtime::MemPool;
pub use scan::{RowBatch, ScanConfig, ScanError, TextScanner, WriteSlotCache};
pub use string_parser::ParseResult;
pub use text_converter::{EscapeConfig, TextConverter};
pub use tuple::{Datum, TupleBuffer};
pub use types::PrimitiveType;
