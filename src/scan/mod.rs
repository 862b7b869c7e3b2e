//! Scan module
//!
//! The caller side of the converter: a routine cache and a delimited-text
//! scanner that drives generated routines row by row.

pub mod cache;
pub mod scanner;

pub use cache::{CacheStats, WriteSlotCache};
pub use scanner::{FieldError, RowBatch, ScanConfig, ScanError, ScanStats, TextScanner};
