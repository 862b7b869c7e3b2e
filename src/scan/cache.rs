//! Write-slot routine cache
//!
//! Routines are generated once per `(layout, slot, escape)` key and shared
//! by every scanner and worker thread that needs them. The key holds the
//! full tuple layout, so two layouts that happen to share a [`TupleId`]
//! never see each other's routines. Refusals are cached too, so a slot the
//! generator cannot handle is only tried once.

use crate::codegen::{CodegenStats, ExecutionMode, SlotCodegen};
use crate::compile::WriteSlotFn;
use crate::descriptor::{SlotDescriptor, TupleDescriptor};
use crate::text_converter::{EscapeConfig, TextConverter};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    layout: TupleDescriptor,
    slot: SlotDescriptor,
    escape: EscapeConfig,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Keys for which generation was refused
    pub refused: u64,
}

pub struct WriteSlotCache {
    entries: RwLock<HashMap<CacheKey, Option<Arc<WriteSlotFn>>>>,
    /// Generation is serialised; lookups are not
    codegen: Mutex<SlotCodegen>,
    mode: ExecutionMode,
    hits: AtomicU64,
    misses: AtomicU64,
    refused: AtomicU64,
}

impl WriteSlotCache {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            codegen: Mutex::new(SlotCodegen::with_mode(mode)),
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// The cached routine for `slot`, generating it on first use.
    ///
    /// `None` means the generator refused; use the interpreted path.
    pub fn get_or_generate(
        &self,
        converter: &TextConverter,
        tuple: &TupleDescriptor,
        slot: &SlotDescriptor,
    ) -> Option<Arc<WriteSlotFn>> {
        let key = CacheKey {
            layout: tuple.clone(),
            slot: slot.clone(),
            escape: converter.escape(),
        };
        if let Some(entry) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.clone();
        }

        let mut codegen = self.codegen.lock();
        // Another thread may have generated it while we waited.
        if let Some(entry) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let routine = converter
            .codegen_write_slot(&mut *codegen, tuple, slot)
            .map(Arc::new);
        if routine.is_none() {
            self.refused.fetch_add(1, Ordering::Relaxed);
        }
        self.entries.write().insert(key, routine.clone());
        routine
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Drop every cached routine along with the IR they were built from
    pub fn clear(&self) {
        let mut codegen = self.codegen.lock();
        self.entries.write().clear();
        codegen.reset();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }

    pub fn codegen_stats(&self) -> CodegenStats {
        self.codegen.lock().stats()
    }
}

impl Default for WriteSlotCache {
    fn default() -> Self {
        Self::new(ExecutionMode::default())
    }
}
