//! Object-identity cache - native pointer to managed wrapper
//!
//! Design: entries hold weak references only. A remembered value gets a
//! reclaim hook, so dropping its last strong reference removes the entry.
//! Removal checks that the entry still refers to the value being reclaimed,
//! since a newer wrapper may have been remembered under the same address.

use super::value::{Boxed, BoxedInner, Instance, InstanceInner, NativePtr, Value};
use crate::errors::{MarshalError, Result};
use dashmap::DashMap;
use std::sync::{Arc, Weak};

enum Entry {
    Instance(Weak<InstanceInner>),
    Boxed(Weak<BoxedInner>),
}

impl Entry {
    fn upgrade(&self) -> Option<Value> {
        match self {
            Self::Instance(weak) => weak.upgrade().map(|inner| Value::Instance(Instance(inner))),
            Self::Boxed(weak) => weak.upgrade().map(|inner| Value::Boxed(Boxed(inner))),
        }
    }

    fn refers_to(&self, addr: *const ()) -> bool {
        match self {
            Self::Instance(weak) => weak.as_ptr() as *const () == addr,
            Self::Boxed(weak) => weak.as_ptr() as *const () == addr,
        }
    }
}

/// Weak pointer-to-wrapper table
pub struct IdentityCache {
    entries: DashMap<NativePtr, Entry>,
}

impl IdentityCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::with_capacity(128),
        })
    }

    /// The live managed value remembered for `ptr`, if any
    pub fn resolve(&self, ptr: NativePtr) -> Option<Value> {
        if ptr.is_null() {
            return None;
        }
        self.entries.get(&ptr).and_then(|entry| entry.upgrade())
    }

    /// Associate `ptr` with `value`; only instances and boxed values carry
    /// a native identity
    pub fn remember(self: &Arc<Self>, ptr: NativePtr, value: &Value) -> Result<()> {
        if ptr.is_null() {
            return Err(MarshalError::IdentityResolution {
                context: format!("identity for {}", value.kind()),
            });
        }
        let entry = match value {
            Value::Instance(inst) => Entry::Instance(inst.downgrade()),
            Value::Boxed(boxed) => Entry::Boxed(boxed.downgrade()),
            other => {
                return Err(MarshalError::argument_type(
                    "identity",
                    "instance or boxed value",
                    other.kind(),
                ))
            }
        };
        self.entries.insert(ptr, entry);
        self.forget_on_reclaim(value);
        Ok(())
    }

    /// Install the reclaim hook that drops this value's entry
    pub fn forget_on_reclaim(self: &Arc<Self>, value: &Value) {
        let weak = Arc::downgrade(self);
        match value {
            Value::Instance(inst) => inst.set_reclaim_hook(weak),
            Value::Boxed(boxed) => boxed.set_reclaim_hook(weak),
            _ => {}
        }
    }

    /// Box `value` and remember it under its own address
    pub fn store(self: &Arc<Self>, value: Value) -> Boxed {
        let boxed = Boxed::new(value);
        self.entries.insert(boxed.ptr(), Entry::Boxed(boxed.downgrade()));
        self.forget_on_reclaim(&Value::Boxed(boxed.clone()));
        boxed
    }

    /// Wrap `ptr` as an instance, reusing a live wrapper for the same pointer
    pub fn wrap_instance(self: &Arc<Self>, ptr: NativePtr, type_name: &str) -> Result<Value> {
        if ptr.is_null() {
            return Err(MarshalError::IdentityResolution {
                context: type_name.to_string(),
            });
        }
        if let Some(existing) = self.resolve(ptr) {
            return Ok(existing);
        }
        let value = Value::Instance(Instance::new(ptr, type_name));
        self.remember(ptr, &value)?;
        Ok(value)
    }

    pub(crate) fn forget_reclaimed(&self, ptr: NativePtr, addr: *const ()) {
        if self.entries.remove_if(&ptr, |_, entry| entry.refers_to(addr)).is_some() {
            tracing::trace!(ptr = %ptr, "identity entry reclaimed");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
