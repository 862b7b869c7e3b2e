//! Interpreter module
//!
//! Walks write-slot IR directly instead of lowering it to a stencil.

pub mod dispatch;

pub use dispatch::{InterpError, Interpreter, RtValue};
