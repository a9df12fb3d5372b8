//! Native heap - handle-based stand-in for the C allocator
//!
//! Design: every buffer the marshaller hands to native code is a typed
//! `NativeBlock` stored under a unique address. Reads and frees of unknown
//! addresses fail instead of corrupting memory, and the allocation counters
//! make ownership mistakes (leaks, double frees) observable.

use super::value::{NativePtr, NativeValue};
use crate::errors::MemoryError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// First address handed out; keeps heap handles away from boxed-value addresses
const HEAP_BASE: u64 = 1 << 62;
const HEAP_ALIGN: u64 = 16;

/// One native allocation
#[derive(Debug, Clone, PartialEq)]
pub enum NativeBlock {
    /// Out-parameter slot holding a single native value
    Cell(NativeValue),
    /// NUL-terminated UTF-8 string
    Str(Vec<u8>),
    /// Contiguous C array, optionally followed by a zero terminator
    Array {
        items: Vec<NativeValue>,
        zero_terminated: bool,
    },
    /// Growable byte buffer
    Bytes(Vec<u8>),
    /// Linked list chain
    List {
        items: Vec<NativeValue>,
        doubly_linked: bool,
    },
    HashTable(Vec<(NativeValue, NativeValue)>),
    /// Caller-allocated struct storage
    Struct { type_name: String, data: Vec<u8> },
    /// Error record written to a fallible call's error slot
    Error {
        domain: String,
        code: i32,
        message: String,
    },
    Trampoline,
}

impl NativeBlock {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cell(_) => "cell",
            Self::Str(_) => "string",
            Self::Array { .. } => "array",
            Self::Bytes(_) => "bytes",
            Self::List { .. } => "list",
            Self::HashTable(_) => "hash table",
            Self::Struct { .. } => "struct",
            Self::Error { .. } => "error",
            Self::Trampoline => "trampoline",
        }
    }

    /// Build a string block, appending the terminator
    pub fn string(s: &str) -> Self {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        Self::Str(bytes)
    }
}

/// Heap counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub frees: u64,
    pub live: usize,
}

/// Thread-safe native heap
pub struct NativeHeap {
    blocks: DashMap<NativePtr, NativeBlock>,
    next: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl NativeHeap {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::with_capacity(256),
            next: AtomicU64::new(HEAP_BASE),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Store a block and return its address
    pub fn alloc(&self, block: NativeBlock) -> NativePtr {
        let ptr = NativePtr(self.next.fetch_add(HEAP_ALIGN, Ordering::Relaxed));
        tracing::trace!(ptr = %ptr, kind = block.kind(), "native alloc");
        self.blocks.insert(ptr, block);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        ptr
    }

    pub fn alloc_cell(&self, value: NativeValue) -> NativePtr {
        self.alloc(NativeBlock::Cell(value))
    }

    pub fn alloc_str(&self, s: &str) -> NativePtr {
        self.alloc(NativeBlock::string(s))
    }

    /// Remove a block and hand it back to the caller
    pub fn take(&self, ptr: NativePtr) -> Result<NativeBlock, MemoryError> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        let (_, block) = self
            .blocks
            .remove(&ptr)
            .ok_or(MemoryError::InvalidPointer(ptr))?;
        self.frees.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(ptr = %ptr, kind = block.kind(), "native free");
        Ok(block)
    }

    /// Free a block; freeing NULL is a no-op
    pub fn free(&self, ptr: NativePtr) -> Result<(), MemoryError> {
        if ptr.is_null() {
            return Ok(());
        }
        self.take(ptr).map(|_| ())
    }

    pub fn contains(&self, ptr: NativePtr) -> bool {
        self.blocks.contains_key(&ptr)
    }

    /// Run `f` against the block at `ptr`
    pub fn with_block<R>(
        &self,
        ptr: NativePtr,
        f: impl FnOnce(&NativeBlock) -> R,
    ) -> Result<R, MemoryError> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        let block = self.blocks.get(&ptr).ok_or(MemoryError::InvalidPointer(ptr))?;
        Ok(f(block.value()))
    }

    pub fn with_block_mut<R>(
        &self,
        ptr: NativePtr,
        f: impl FnOnce(&mut NativeBlock) -> R,
    ) -> Result<R, MemoryError> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        let mut block = self
            .blocks
            .get_mut(&ptr)
            .ok_or(MemoryError::InvalidPointer(ptr))?;
        Ok(f(block.value_mut()))
    }

    pub fn read_cell(&self, ptr: NativePtr) -> Result<NativeValue, MemoryError> {
        self.with_block(ptr, |block| match block {
            NativeBlock::Cell(value) => Ok(*value),
            other => Err(wrong_kind(ptr, "cell", other)),
        })?
    }

    pub fn write_cell(&self, ptr: NativePtr, value: NativeValue) -> Result<(), MemoryError> {
        self.with_block_mut(ptr, |block| match block {
            NativeBlock::Cell(slot) => {
                *slot = value;
                Ok(())
            }
            other => Err(wrong_kind(ptr, "cell", other)),
        })?
    }

    /// Read a NUL-terminated string, stopping at the first terminator
    pub fn read_str(&self, ptr: NativePtr) -> Result<String, MemoryError> {
        self.with_block(ptr, |block| match block {
            NativeBlock::Str(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            other => Err(wrong_kind(ptr, "string", other)),
        })?
    }

    /// Items of an array or list block
    pub fn read_items(&self, ptr: NativePtr) -> Result<Vec<NativeValue>, MemoryError> {
        self.with_block(ptr, |block| match block {
            NativeBlock::Array { items, .. } | NativeBlock::List { items, .. } => Ok(items.clone()),
            other => Err(wrong_kind(ptr, "array", other)),
        })?
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            live: self.blocks.len(),
        }
    }
}

impl Default for NativeHeap {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn wrong_kind(ptr: NativePtr, expected: &'static str, found: &NativeBlock) -> MemoryError {
    MemoryError::WrongKind {
        ptr,
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_free() {
        let heap = NativeHeap::new();
        let a = heap.alloc_str("hello");
        let b = heap.alloc_cell(NativeValue::Int(3));
        assert_ne!(a, b);
        assert_eq!(heap.live_blocks(), 2);

        heap.free(a).unwrap();
        assert_eq!(heap.free(a), Err(MemoryError::InvalidPointer(a)));
        assert_eq!(heap.stats(), HeapStats { allocations: 2, frees: 1, live: 1 });
    }

    #[test]
    fn test_free_null_is_noop() {
        let heap = NativeHeap::new();
        assert!(heap.free(NativePtr::NULL).is_ok());
        assert_eq!(heap.stats().frees, 0);
    }

    #[test]
    fn test_cells() {
        let heap = NativeHeap::new();
        let cell = heap.alloc_cell(NativeValue::NULL);
        heap.write_cell(cell, NativeValue::Int(42)).unwrap();
        assert_eq!(heap.read_cell(cell).unwrap(), NativeValue::Int(42));

        let s = heap.alloc_str("x");
        assert!(matches!(
            heap.read_cell(s),
            Err(MemoryError::WrongKind { expected: "cell", found: "string", .. })
        ));
    }

    #[test]
    fn test_read_str_stops_at_terminator() {
        let heap = NativeHeap::new();
        let ptr = heap.alloc(NativeBlock::Str(b"ab\0cd".to_vec()));
        assert_eq!(heap.read_str(ptr).unwrap(), "ab");
    }

    #[test]
    fn test_addresses_are_aligned_and_high() {
        let heap = NativeHeap::new();
        let ptr = heap.alloc(NativeBlock::Trampoline);
        assert!(ptr.addr() >= HEAP_BASE);
        assert_eq!(ptr.addr() % HEAP_ALIGN, 0);
    }
}
