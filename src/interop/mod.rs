//! Interoperability - native-side services used by generated callables
//!
//! Design: generated callables never touch native memory directly. They go
//! through the services here, which keeps ownership rules checkable.
//!
//! Architecture:
//! - `value.rs` - managed values, native values, call outputs
//! - `memory.rs` - handle-based native heap
//! - `identity.rs` - weak pointer ↔ wrapper table
//! - `trampoline.rs` - callback registry and dispatch
//! - `call.rs` - native call primitive, symbol table, shared context
//! - `marshal.rs` - managed ↔ native conversions

mod value;
mod memory;
mod identity;
mod trampoline;
mod call;
pub mod marshal;

pub use value::{Boxed, CallOutput, Closure, Instance, NativePtr, NativeValue, Value};
pub use memory::{HeapStats, NativeBlock, NativeHeap};
pub use identity::IdentityCache;
pub use trampoline::{CallbackRegistry, Retention};
pub use call::{NativeCall, NativeContext, NativeFn, NativeInvoker, SymbolTable};

use std::sync::atomic::{AtomicU64, Ordering};

/// Interop counters, shared by a runtime's callables
#[derive(Debug, Default)]
pub struct InteropCounters {
    calls_made: AtomicU64,
    native_errors: AtomicU64,
    bindings_built: AtomicU64,
    cleanup_steps: AtomicU64,
}

impl InteropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_call(&self) {
        self.calls_made.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_native_error(&self) {
        self.native_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_binding(&self) {
        self.bindings_built.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cleanup(&self, steps: usize) {
        self.cleanup_steps.fetch_add(steps as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache_hits: u64, cache_misses: u64) -> InteropStats {
        InteropStats {
            calls_made: self.calls_made.load(Ordering::Relaxed),
            native_errors: self.native_errors.load(Ordering::Relaxed),
            bindings_built: self.bindings_built.load(Ordering::Relaxed),
            cleanup_steps: self.cleanup_steps.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
        }
    }

    pub fn reset(&self) {
        self.calls_made.store(0, Ordering::Relaxed);
        self.native_errors.store(0, Ordering::Relaxed);
        self.bindings_built.store(0, Ordering::Relaxed);
        self.cleanup_steps.store(0, Ordering::Relaxed);
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteropStats {
    pub calls_made: u64,
    pub native_errors: u64,
    pub bindings_built: u64,
    pub cleanup_steps: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests;
