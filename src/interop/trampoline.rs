//! Callback trampolines
//!
//! A trampoline is a native-callable address standing for a managed closure.
//! Call-scoped trampolines are released by the call's cleanup; trampolines
//! whose ownership was transferred stay registered until native code
//! signals destroy-notify.

use super::call::NativeContext;
use super::marshal;
use super::memory::{NativeBlock, NativeHeap};
use super::value::{Closure, NativePtr, NativeValue, Value};
use crate::core::types::{CallbackInfo, Ownership};
use crate::errors::{CallError, MarshalError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How long a trampoline must stay valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Released when the native call returns
    Call,
    /// Released when native code signals destroy-notify
    UntilNotify,
}

impl Retention {
    /// Retention implied by a callback argument's ownership transfer
    pub fn for_ownership(ownership: Ownership) -> Self {
        match ownership {
            Ownership::Everything => Self::UntilNotify,
            Ownership::None | Ownership::Container => Self::Call,
        }
    }
}

struct Registration {
    closure: Closure,
    info: Arc<CallbackInfo>,
    retention: Retention,
    /// Managed values the closure's user data points at
    keep_alive: Vec<Value>,
}

/// Registry of live trampolines, keyed by trampoline address
pub struct CallbackRegistry {
    heap: Arc<NativeHeap>,
    entries: DashMap<NativePtr, Registration>,
    registered: AtomicU64,
    released: AtomicU64,
}

impl CallbackRegistry {
    pub fn new(heap: Arc<NativeHeap>) -> Self {
        Self {
            heap,
            entries: DashMap::new(),
            registered: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Create a trampoline for `closure`
    pub fn register(&self, closure: Closure, info: Arc<CallbackInfo>, retention: Retention) -> NativePtr {
        let ptr = self.heap.alloc(NativeBlock::Trampoline);
        crate::logging::log_callback_registered(&info.name, ptr, retention);
        self.entries.insert(
            ptr,
            Registration {
                closure,
                info,
                retention,
                keep_alive: Vec::new(),
            },
        );
        self.registered.fetch_add(1, Ordering::Relaxed);
        ptr
    }

    /// Tie `values` to the trampoline at `ptr`; they are dropped with it
    pub fn keep_alive(&self, ptr: NativePtr, values: Vec<Value>) -> bool {
        match self.entries.get_mut(&ptr) {
            Some(mut entry) => {
                entry.keep_alive.extend(values);
                true
            }
            None => false,
        }
    }

    /// Drop a trampoline regardless of retention
    pub fn untrack(&self, ptr: NativePtr) -> bool {
        match self.entries.remove(&ptr) {
            Some((_, registration)) => {
                if let Err(err) = self.heap.free(ptr) {
                    tracing::warn!(ptr = %ptr, error = %err, "trampoline block already gone");
                }
                self.released.fetch_add(1, Ordering::Relaxed);
                crate::logging::log_callback_released(&registration.info.name, ptr);
                true
            }
            None => false,
        }
    }

    /// Release a call-scoped trampoline; notify-retained ones are left alone
    pub fn release_call_scoped(&self, ptr: NativePtr) -> bool {
        let scoped = self
            .entries
            .get(&ptr)
            .map_or(false, |entry| entry.retention == Retention::Call);
        scoped && self.untrack(ptr)
    }

    /// Destroy-notify from native code
    pub fn notify_destroyed(&self, ptr: NativePtr) -> bool {
        self.untrack(ptr)
    }

    /// Managed closure behind a trampoline address
    pub fn lookup(&self, ptr: NativePtr) -> Option<Closure> {
        self.entries.get(&ptr).map(|entry| entry.closure.clone())
    }

    pub fn retention_of(&self, ptr: NativePtr) -> Option<Retention> {
        self.entries.get(&ptr).map(|entry| entry.retention)
    }

    /// Invoke the closure behind `ptr` with native arguments
    ///
    /// Arguments are converted with the callback's declared descriptors and
    /// the result is converted back to its declared return type.
    pub fn dispatch(&self, ptr: NativePtr, args: &[NativeValue], ctx: &NativeContext) -> Result<NativeValue> {
        let (closure, info) = self
            .entries
            .get(&ptr)
            .map(|entry| (entry.closure.clone(), entry.info.clone()))
            .ok_or_else(|| CallError::Abi(format!("{} is not a live trampoline", ptr)))?;

        if args.len() != info.args.len() {
            return Err(MarshalError::ArityMismatch {
                callable: info.name.clone(),
                expected: info.args.len(),
                found: args.len(),
            });
        }

        let managed = args
            .iter()
            .zip(&info.args)
            .map(|(native, ty)| marshal::to_managed(*native, ty, None, ctx))
            .collect::<Result<Vec<Value>>>()?;

        let result = closure.call(&managed)?;
        if info.return_type.is_void() {
            return Ok(NativeValue::Void);
        }
        marshal::to_native(&result, &info.return_type, ctx, &info.name)
    }

    /// Trampolines currently alive
    pub fn retained(&self) -> usize {
        self.entries.len()
    }

    pub fn counts(&self) -> (u64, u64) {
        (
            self.registered.load(Ordering::Relaxed),
            self.released.load(Ordering::Relaxed),
        )
    }

    /// Release every trampoline
    pub fn clear(&self) {
        let ptrs: Vec<NativePtr> = self.entries.iter().map(|entry| *entry.key()).collect();
        for ptr in ptrs {
            self.untrack(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeDescriptor;

    fn adder() -> Arc<CallbackInfo> {
        Arc::new(CallbackInfo::new(
            "Regress",
            "TestCallbackUserData",
            vec![TypeDescriptor::int32(), TypeDescriptor::int32()],
            TypeDescriptor::int32(),
        ))
    }

    fn sum_closure() -> Closure {
        Closure::new(|args| {
            let total = args.iter().filter_map(Value::as_int).sum::<i64>();
            Ok(Value::Int(total))
        })
    }

    #[test]
    fn test_dispatch_converts_both_ways() {
        let ctx = NativeContext::new();
        let ptr = ctx.callbacks.register(sum_closure(), adder(), Retention::Call);
        let result = ctx
            .callbacks
            .dispatch(ptr, &[NativeValue::Int(2), NativeValue::Int(40)], &ctx)
            .unwrap();
        assert_eq!(result, NativeValue::Int(42));
    }

    #[test]
    fn test_dispatch_checks_arity() {
        let ctx = NativeContext::new();
        let ptr = ctx.callbacks.register(sum_closure(), adder(), Retention::Call);
        let err = ctx.callbacks.dispatch(ptr, &[NativeValue::Int(1)], &ctx).unwrap_err();
        assert!(matches!(err, MarshalError::ArityMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_retention_rules() {
        let ctx = NativeContext::new();
        let scoped = ctx.callbacks.register(sum_closure(), adder(), Retention::Call);
        let kept = ctx.callbacks.register(sum_closure(), adder(), Retention::UntilNotify);
        assert_eq!(ctx.callbacks.retained(), 2);

        assert!(ctx.callbacks.release_call_scoped(scoped));
        assert!(!ctx.callbacks.release_call_scoped(kept));
        assert_eq!(ctx.callbacks.retained(), 1);
        assert!(ctx.callbacks.lookup(kept).is_some());

        assert!(ctx.callbacks.notify_destroyed(kept));
        assert!(!ctx.callbacks.notify_destroyed(kept));
        assert_eq!(ctx.callbacks.retained(), 0);
        assert_eq!(ctx.heap.live_blocks(), 0);
        assert_eq!(ctx.callbacks.counts(), (2, 2));
    }

    #[test]
    fn test_kept_values_live_until_notify() {
        let ctx = NativeContext::new();
        let ptr = ctx.callbacks.register(sum_closure(), adder(), Retention::UntilNotify);
        let boxed = ctx.identity.store(Value::str("data"));
        let data = boxed.ptr();

        assert!(ctx.callbacks.keep_alive(ptr, vec![Value::Boxed(boxed)]));
        assert!(ctx.identity.resolve(data).is_some());

        assert!(ctx.callbacks.notify_destroyed(ptr));
        assert_eq!(ctx.identity.resolve(data), None);
        assert!(!ctx.callbacks.keep_alive(ptr, Vec::new()));
    }

    #[test]
    fn test_retention_for_ownership() {
        assert_eq!(Retention::for_ownership(Ownership::Everything), Retention::UntilNotify);
        assert_eq!(Retention::for_ownership(Ownership::None), Retention::Call);
    }
}
