//! Native call primitive
//!
//! Invocation is delegated to a `NativeInvoker`: given a symbol and ordered
//! native arguments it performs the call and returns a native value. It only
//! fails for ABI-level problems; domain errors travel through the error slot.

use super::identity::IdentityCache;
use super::memory::{wrong_kind, NativeBlock, NativeHeap};
use super::trampoline::CallbackRegistry;
use super::value::{NativePtr, NativeValue};
use crate::errors::{CallError, MemoryError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Services shared by the marshaller and native implementations
#[derive(Clone)]
pub struct NativeContext {
    pub heap: Arc<NativeHeap>,
    pub identity: Arc<IdentityCache>,
    pub callbacks: Arc<CallbackRegistry>,
}

impl NativeContext {
    pub fn new() -> Self {
        let heap = Arc::new(NativeHeap::new());
        Self {
            callbacks: Arc::new(CallbackRegistry::new(heap.clone())),
            identity: IdentityCache::new(),
            heap,
        }
    }
}

impl Default for NativeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeContext")
            .field("live_blocks", &self.heap.live_blocks())
            .field("identities", &self.identity.len())
            .field("trampolines", &self.callbacks.retained())
            .finish()
    }
}

impl From<MemoryError> for CallError {
    fn from(err: MemoryError) -> Self {
        CallError::Abi(err.to_string())
    }
}

/// One native invocation
pub struct NativeCall<'a> {
    pub symbol: &'a str,
    pub args: &'a [NativeValue],
    pub context: &'a NativeContext,
}

impl<'a> NativeCall<'a> {
    pub fn new(symbol: &'a str, args: &'a [NativeValue], context: &'a NativeContext) -> Self {
        Self { symbol, args, context }
    }

    #[inline]
    pub fn heap(&self) -> &NativeHeap {
        &self.context.heap
    }

    /// Fail unless exactly `expected` arguments were passed
    pub fn expect_args(&self, expected: usize) -> Result<(), CallError> {
        if self.args.len() == expected {
            Ok(())
        } else {
            Err(CallError::ArgCountMismatch {
                symbol: self.symbol.to_string(),
                expected,
                got: self.args.len(),
            })
        }
    }

    pub fn arg(&self, index: usize) -> Result<NativeValue, CallError> {
        self.args.get(index).copied().ok_or_else(|| CallError::ArgCountMismatch {
            symbol: self.symbol.to_string(),
            expected: index + 1,
            got: self.args.len(),
        })
    }

    pub fn int(&self, index: usize) -> Result<i64, CallError> {
        self.arg(index).map(NativeValue::as_i64)
    }

    pub fn ptr(&self, index: usize) -> Result<NativePtr, CallError> {
        self.arg(index).map(NativeValue::as_ptr)
    }

    /// String argument; NULL reads as `None`
    pub fn read_str(&self, index: usize) -> Result<Option<String>, CallError> {
        let ptr = self.ptr(index)?;
        if ptr.is_null() {
            return Ok(None);
        }
        Ok(Some(self.heap().read_str(ptr)?))
    }

    /// Items of an array or list argument; NULL reads as empty
    pub fn read_items(&self, index: usize) -> Result<Vec<NativeValue>, CallError> {
        let ptr = self.ptr(index)?;
        if ptr.is_null() {
            return Ok(Vec::new());
        }
        Ok(self.heap().read_items(ptr)?)
    }

    /// Write through the out-slot passed at `index`
    pub fn write_out(&self, index: usize, value: NativeValue) -> Result<(), CallError> {
        let slot = self.ptr(index)?;
        Ok(self.heap().write_cell(slot, value)?)
    }

    /// Read the current content of the out-slot at `index` (inout arguments)
    pub fn read_slot(&self, index: usize) -> Result<NativeValue, CallError> {
        let slot = self.ptr(index)?;
        Ok(self.heap().read_cell(slot)?)
    }

    /// Mutable access to a caller-allocated struct
    pub fn with_struct<R>(&self, index: usize, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R, CallError> {
        let ptr = self.ptr(index)?;
        let result = self.heap().with_block_mut(ptr, |block| match block {
            NativeBlock::Struct { data, .. } => Ok(f(data)),
            other => Err(wrong_kind(ptr, "struct", other)),
        })?;
        Ok(result?)
    }

    pub fn alloc_str(&self, s: &str) -> NativeValue {
        NativeValue::Pointer(self.heap().alloc_str(s))
    }

    pub fn alloc(&self, block: NativeBlock) -> NativeValue {
        NativeValue::Pointer(self.heap().alloc(block))
    }

    /// Populate the error slot at `index`
    pub fn fail(&self, index: usize, domain: &str, code: i32, message: &str) -> Result<(), CallError> {
        let record = self.heap().alloc(NativeBlock::Error {
            domain: domain.to_string(),
            code,
            message: message.to_string(),
        });
        self.write_out(index, NativeValue::Pointer(record))
    }
}

/// Performs native calls
pub trait NativeInvoker: Send + Sync {
    fn invoke(&self, call: &NativeCall<'_>) -> Result<NativeValue, CallError>;
}

pub type NativeFn = Arc<dyn Fn(&NativeCall<'_>) -> Result<NativeValue, CallError> + Send + Sync>;

/// In-process symbol table of native implementations
pub struct SymbolTable {
    symbols: DashMap<String, NativeFn>,
    calls: AtomicU64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: DashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn register<F>(&self, symbol: impl Into<String>, f: F)
    where
        F: Fn(&NativeCall<'_>) -> Result<NativeValue, CallError> + Send + Sync + 'static,
    {
        self.symbols.insert(symbol.into(), Arc::new(f));
    }

    /// Builder form of `register`
    pub fn with<F>(self, symbol: impl Into<String>, f: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> Result<NativeValue, CallError> + Send + Sync + 'static,
    {
        self.register(symbol, f);
        self
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// Number of calls dispatched so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeInvoker for SymbolTable {
    fn invoke(&self, call: &NativeCall<'_>) -> Result<NativeValue, CallError> {
        let f = self
            .symbols
            .get(call.symbol)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CallError::SymbolNotFound(call.symbol.to_string()))?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        f(call)
    }
}
