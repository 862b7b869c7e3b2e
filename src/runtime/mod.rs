//! Runtime module
//!
//! Memory backing for values produced while scanning a batch.

pub mod mem_pool;

pub use mem_pool::MemPool;
