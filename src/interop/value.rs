//! Managed and native value representations
//!
//! `Value` is what callers pass to and receive from a generated callable.
//! `NativeValue` is what crosses the native call boundary: scalars and
//! addresses, nothing else.

use super::identity::IdentityCache;
use super::memory::NativeHeap;
use crate::errors::Result;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::{Arc, Weak};

/// Opaque native address; zero is NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativePtr(pub u64);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn addr(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Value as passed through the native ABI
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    Void,
    Int(i64),
    UInt(u64),
    Float(f64),
    Pointer(NativePtr),
}

impl NativeValue {
    pub const NULL: NativeValue = NativeValue::Pointer(NativePtr::NULL);

    /// Integer view; pointers yield their address
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Void => 0,
            Self::Int(v) => v,
            Self::UInt(v) => v as i64,
            Self::Float(v) => v as i64,
            Self::Pointer(p) => p.0 as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Self::UInt(v) => v,
            other => other.as_i64() as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(v) => v,
            Self::UInt(v) => v as f64,
            other => other.as_i64() as f64,
        }
    }

    /// Pointer view; integers are reinterpreted as addresses
    pub fn as_ptr(self) -> NativePtr {
        match self {
            Self::Pointer(p) => p,
            Self::Void | Self::Float(_) => NativePtr::NULL,
            other => NativePtr(other.as_u64()),
        }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.as_ptr().is_null()
    }
}

impl From<NativePtr> for NativeValue {
    fn from(ptr: NativePtr) -> Self {
        Self::Pointer(ptr)
    }
}

pub(crate) struct InstanceInner {
    ptr: NativePtr,
    type_name: String,
    reclaim: OnceCell<Weak<IdentityCache>>,
    storage: Option<Arc<NativeHeap>>,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if let Some(cache) = self.reclaim.get().and_then(Weak::upgrade) {
            cache.forget_reclaimed(self.ptr, self as *const Self as *const ());
        }
        if let Some(heap) = &self.storage {
            if let Err(err) = heap.free(self.ptr) {
                tracing::warn!(ptr = %self.ptr, error = %err, "failed to free instance storage");
            }
        }
    }
}

/// Managed wrapper around a native object or struct pointer
#[derive(Clone)]
pub struct Instance(pub(crate) Arc<InstanceInner>);

impl Instance {
    pub fn new(ptr: NativePtr, type_name: impl Into<String>) -> Self {
        Self(Arc::new(InstanceInner {
            ptr,
            type_name: type_name.into(),
            reclaim: OnceCell::new(),
            storage: None,
        }))
    }

    /// Wrapper that frees its heap block when the last reference goes away
    pub fn owning(ptr: NativePtr, type_name: impl Into<String>, heap: Arc<NativeHeap>) -> Self {
        Self(Arc::new(InstanceInner {
            ptr,
            type_name: type_name.into(),
            reclaim: OnceCell::new(),
            storage: Some(heap),
        }))
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.0.ptr
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_reclaim_hook(&self, cache: Weak<IdentityCache>) {
        let _ = self.0.reclaim.set(cache);
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Arc::downgrade(&self.0)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {}>", self.0.type_name, self.0.ptr)
    }
}

pub(crate) struct BoxedInner {
    value: Value,
    reclaim: OnceCell<Weak<IdentityCache>>,
}

impl BoxedInner {
    fn address(&self) -> NativePtr {
        NativePtr(self as *const Self as usize as u64)
    }
}

impl Drop for BoxedInner {
    fn drop(&mut self) {
        if let Some(cache) = self.reclaim.get().and_then(Weak::upgrade) {
            cache.forget_reclaimed(self.address(), self as *const Self as *const ());
        }
    }
}

/// Managed value with a stable native identity, passed as opaque user data
#[derive(Clone)]
pub struct Boxed(pub(crate) Arc<BoxedInner>);

impl Boxed {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(BoxedInner {
            value,
            reclaim: OnceCell::new(),
        }))
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.0.address()
    }

    pub fn value(&self) -> &Value {
        &self.0.value
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Boxed) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_reclaim_hook(&self, cache: Weak<IdentityCache>) {
        let _ = self.0.reclaim.set(cache);
    }

    pub(crate) fn downgrade(&self) -> Weak<BoxedInner> {
        Arc::downgrade(&self.0)
    }
}

impl fmt::Debug for Boxed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Boxed({:?} at {})", self.0.value, self.ptr())
    }
}

type ClosureFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// Managed callable handed to native code through a trampoline
#[derive(Clone)]
pub struct Closure(Arc<ClosureFn>);

impl Closure {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Closure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Managed value
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// Enum member name
    Symbol(String),
    List(Vec<Value>),
    Bytes(Vec<u8>),
    /// Ordered key/value pairs
    Map(Vec<(Value, Value)>),
    Pointer(NativePtr),
    Instance(Instance),
    Boxed(Boxed),
    Callable(Closure),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Self::Symbol(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn ints(items: impl IntoIterator<Item = i64>) -> Self {
        Self::List(items.into_iter().map(Value::Int).collect())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Callable(Closure::new(f))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    /// Short kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Symbol(_) => "symbol",
            Self::List(_) => "list",
            Self::Bytes(_) => "bytes",
            Self::Map(_) => "map",
            Self::Pointer(_) => "pointer",
            Self::Instance(_) => "instance",
            Self::Boxed(_) => "boxed",
            Self::Callable(_) => "callable",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => a.ptr_eq(b),
            (Self::Boxed(a), Self::Boxed(b)) => a.ptr_eq(b),
            (Self::Callable(a), Self::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Externally visible result of a generated callable
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    Unit,
    Single(Value),
    Tuple(Vec<Value>),
}

impl CallOutput {
    /// Collapse zero, one or many results
    pub fn from_values(mut values: Vec<Value>) -> Self {
        match values.len() {
            0 => Self::Unit,
            1 => Self::Single(values.remove(0)),
            _ => Self::Tuple(values),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Unit => Vec::new(),
            Self::Single(v) => vec![v],
            Self::Tuple(vs) => vs,
        }
    }

    /// The single result, if exactly one value was produced
    pub fn single(self) -> Option<Value> {
        match self {
            Self::Single(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = Instance::new(NativePtr(0x10), "Regress.TestObj");
        let b = Instance::new(NativePtr(0x10), "Regress.TestObj");
        assert_eq!(Value::Instance(a.clone()), Value::Instance(a.clone()));
        assert_ne!(Value::Instance(a), Value::Instance(b));
    }

    #[test]
    fn test_boxed_address_is_stable() {
        let boxed = Boxed::new(Value::Int(7));
        let copy = boxed.clone();
        assert_eq!(boxed.ptr(), copy.ptr());
        assert!(!boxed.ptr().is_null());
    }

    #[test]
    fn test_native_views() {
        assert_eq!(NativeValue::Int(-1).as_u64(), u64::MAX);
        assert!(NativeValue::NULL.is_null());
        assert!(NativeValue::Int(0).is_null());
        assert_eq!(NativeValue::UInt(0x20).as_ptr(), NativePtr(0x20));
    }

    #[test]
    fn test_call_output_collapse() {
        assert_eq!(CallOutput::from_values(vec![]), CallOutput::Unit);
        assert_eq!(CallOutput::from_values(vec![Value::Int(1)]), CallOutput::Single(Value::Int(1)));
        assert_eq!(
            CallOutput::from_values(vec![Value::Int(1), Value::Nil]).into_values().len(),
            2
        );
    }
}
