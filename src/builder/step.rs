//! Steps of a generated callable and the frame they run over
//!
//! A generated callable is a flat program: each `Step` reads and writes frame
//! slots named by `Var`s. Conversions are delegated to `interop::marshal`.

use super::vars::Var;
use crate::core::types::{Ownership, TypeDescriptor, TypeTag};
use crate::errors::{CallError, MarshalError, MemoryError, Result};
use crate::interop::{
    marshal, Instance, NativeBlock, NativeCall, NativeContext, NativeInvoker, NativePtr, NativeValue, Retention,
    Value,
};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Managed(Value),
    Native(NativeValue),
}

/// Slot storage for one invocation
#[derive(Debug)]
pub struct Frame {
    slots: Vec<Slot>,
}

impl Frame {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Slot::Empty; size],
        }
    }

    pub fn set_value(&mut self, var: Var, value: Value) {
        self.slots[var.index()] = Slot::Managed(value);
    }

    pub fn set_native(&mut self, var: Var, value: NativeValue) {
        self.slots[var.index()] = Slot::Native(value);
    }

    pub fn value(&self, var: Var) -> Result<&Value> {
        match &self.slots[var.index()] {
            Slot::Managed(value) => Ok(value),
            _ => Err(MarshalError::Frame {
                slot: var.to_string(),
                expected: "managed",
            }),
        }
    }

    pub fn native(&self, var: Var) -> Result<NativeValue> {
        self.native_opt(var).ok_or_else(|| MarshalError::Frame {
            slot: var.to_string(),
            expected: "native",
        })
    }

    /// Native value if the slot was ever filled
    pub fn native_opt(&self, var: Var) -> Option<NativeValue> {
        match &self.slots[var.index()] {
            Slot::Native(value) => Some(*value),
            _ => None,
        }
    }

    /// Move a managed value out, leaving the slot empty
    pub fn take_value(&mut self, var: Var) -> Result<Value> {
        match std::mem::replace(&mut self.slots[var.index()], Slot::Empty) {
            Slot::Managed(value) => Ok(value),
            other => {
                self.slots[var.index()] = other;
                Err(MarshalError::Frame {
                    slot: var.to_string(),
                    expected: "managed",
                })
            }
        }
    }
}

/// What a step needs from its surroundings
pub struct Env<'a> {
    pub invoker: &'a dyn NativeInvoker,
    pub context: &'a NativeContext,
    pub symbol: &'a str,
}

/// One action of a generated callable
#[derive(Debug, Clone)]
pub enum Step {
    /// Element count of a managed sequence, checked against the length
    /// parameter's type; absent counts as zero
    LengthOf {
        array: Var,
        dest: Var,
        ty: TypeDescriptor,
        name: String,
    },
    ToNative { src: Var, dest: Var, ty: TypeDescriptor, name: String },
    /// Opaque pointer argument; plain values are boxed for the call's duration,
    /// or until destroy-notify when a retained trampoline holds them
    Opaque { src: Var, dest: Var, name: String },
    Callback {
        src: Var,
        dest: Var,
        ty: TypeDescriptor,
        name: String,
        retention: Retention,
    },
    /// Keep boxed user data alive while the trampoline stays registered
    Retain { trampoline: Var, values: Vec<Var> },
    /// Fresh out-slot cell
    AllocOut { dest: Var },
    /// Caller-allocated struct storage
    AllocCaller { dest: Var, ty: TypeDescriptor },
    StoreSlot { slot: Var, src: Var },
    /// Raise the error written to a fallible call's error slot
    CheckError { slot: Var },
    ReadSlot { slot: Var, dest: Var },
    ToManaged {
        src: Var,
        dest: Var,
        ty: TypeDescriptor,
        length: Option<Var>,
    },
    WrapCaller { src: Var, dest: Var, ty: TypeDescriptor },
    /// Free caller-allocated storage that never got a wrapper
    DiscardCaller { src: Var, wrapped: Var },
    /// Wrap a constructor's result as a fresh instance
    Construct { src: Var, dest: Var, ty: TypeDescriptor },
    RefSink { src: Var, symbol: String },
    Release { src: Var, ty: TypeDescriptor, ownership: Ownership },
    FreeSlot { slot: Var },
    Untrack { src: Var },
}

impl Step {
    pub fn run(&self, frame: &mut Frame, env: &Env<'_>) -> Result<()> {
        let ctx = env.context;
        match self {
            Step::LengthOf { array, dest, ty, name } => {
                let len = marshal::length_of(frame.value(*array)?, name)?;
                let count = marshal::to_native(&Value::UInt(len as u64), ty, ctx, name)?;
                frame.set_native(*dest, count);
            }
            Step::ToNative { src, dest, ty, name } => {
                let native = marshal::to_native(frame.value(*src)?, ty, ctx, name)?;
                frame.set_native(*dest, native);
            }
            Step::Opaque { src, dest, name } => {
                let value = frame.value(*src)?.clone();
                let native = match value {
                    Value::Nil => NativeValue::NULL,
                    Value::Int(v) => NativeValue::Int(v),
                    Value::UInt(v) => NativeValue::UInt(v),
                    Value::Pointer(_) | Value::Instance(_) | Value::Boxed(_) => {
                        marshal::to_native(&value, &TypeDescriptor::pointer(), ctx, name)?
                    }
                    other => {
                        let boxed = ctx.identity.store(other);
                        let ptr = boxed.ptr();
                        frame.set_value(*src, Value::Boxed(boxed));
                        NativeValue::Pointer(ptr)
                    }
                };
                frame.set_native(*dest, native);
            }
            Step::Callback {
                src,
                dest,
                ty,
                name,
                retention,
            } => {
                let native = match (frame.value(*src)?, ty.tag()) {
                    (Value::Callable(closure), TypeTag::Callback(info)) => NativeValue::Pointer(
                        ctx.callbacks.register(closure.clone(), info.clone(), *retention),
                    ),
                    (value, _) => marshal::to_native(value, ty, ctx, name)?,
                };
                frame.set_native(*dest, native);
            }
            Step::Retain { trampoline, values } => {
                let boxed = values
                    .iter()
                    .filter_map(|var| match frame.value(*var) {
                        Ok(value @ Value::Boxed(_)) => Some(value.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                if let Some(native) = frame.native_opt(*trampoline) {
                    if !boxed.is_empty() {
                        ctx.callbacks.keep_alive(native.as_ptr(), boxed);
                    }
                }
            }
            Step::AllocOut { dest } => {
                let cell = ctx.heap.alloc_cell(NativeValue::NULL);
                frame.set_native(*dest, NativeValue::Pointer(cell));
            }
            Step::AllocCaller { dest, ty } => {
                let (type_name, size) = match ty.tag() {
                    TypeTag::Struct(reg) | TypeTag::Object(reg) | TypeTag::Interface(reg) => {
                        (reg.qualified_name(), reg.size)
                    }
                    _ => (ty.to_string(), 0),
                };
                let ptr = ctx.heap.alloc(NativeBlock::Struct {
                    type_name,
                    data: vec![0; size],
                });
                frame.set_native(*dest, NativeValue::Pointer(ptr));
            }
            Step::StoreSlot { slot, src } => {
                ctx.heap
                    .write_cell(frame.native(*slot)?.as_ptr(), frame.native(*src)?)?;
            }
            Step::CheckError { slot } => {
                let record = ctx.heap.read_cell(frame.native(*slot)?.as_ptr())?.as_ptr();
                if !record.is_null() {
                    return Err(take_error(record, env));
                }
            }
            Step::ReadSlot { slot, dest } => {
                let value = ctx.heap.read_cell(frame.native(*slot)?.as_ptr())?;
                frame.set_native(*dest, value);
            }
            Step::ToManaged { src, dest, ty, length } => {
                let count = match length {
                    Some(var) => Some(usize::try_from(frame.native(*var)?.as_i64()).unwrap_or(0)),
                    None => None,
                };
                let value = marshal::to_managed(frame.native(*src)?, ty, count, ctx)?;
                frame.set_value(*dest, value);
            }
            Step::WrapCaller { src, dest, ty } => {
                let value = marshal::wrap_owned(frame.native(*src)?.as_ptr(), ty, ctx)?;
                frame.set_value(*dest, value);
            }
            Step::Construct { src, dest, ty } => {
                let ptr = frame.native(*src)?.as_ptr();
                let type_name = match ty.tag() {
                    TypeTag::Struct(reg) | TypeTag::Object(reg) | TypeTag::Interface(reg) => {
                        reg.qualified_name()
                    }
                    _ => ty.to_string(),
                };
                if ptr.is_null() {
                    return Err(MarshalError::IdentityResolution { context: type_name });
                }
                let value = Value::Instance(Instance::new(ptr, type_name));
                ctx.identity.remember(ptr, &value)?;
                frame.set_value(*dest, value);
            }
            Step::RefSink { src, symbol } => {
                let args = [frame.native(*src)?];
                tracing::trace!(symbol = %symbol, ptr = %args[0].as_ptr(), "ref-sink");
                env.invoker.invoke(&NativeCall::new(symbol, &args, ctx))?;
            }
            Step::Release { src, ty, ownership } => {
                if let Some(native) = frame.native_opt(*src) {
                    marshal::release(native, ty, *ownership, ctx)?;
                }
            }
            Step::DiscardCaller { src, wrapped } => {
                if frame.value(*wrapped).is_err() {
                    if let Some(native) = frame.native_opt(*src) {
                        ctx.heap.free(native.as_ptr())?;
                    }
                }
            }
            Step::FreeSlot { slot } => {
                if let Some(native) = frame.native_opt(*slot) {
                    ctx.heap.free(native.as_ptr())?;
                }
            }
            Step::Untrack { src } => {
                if let Some(native) = frame.native_opt(*src) {
                    ctx.callbacks.release_call_scoped(native.as_ptr());
                }
            }
        }
        Ok(())
    }
}

/// Consume the error record at `record` and turn it into a call error
fn take_error(record: NativePtr, env: &Env<'_>) -> MarshalError {
    match env.context.heap.take(record) {
        Ok(NativeBlock::Error { domain, code, message }) => {
            crate::logging::log_native_error(env.symbol, &domain, code, &message);
            MarshalError::NativeCall { message, domain, code }
        }
        Ok(other) => MemoryError::WrongKind {
            ptr: record,
            expected: "error",
            found: other.kind(),
        }
        .into(),
        Err(err) => err.into(),
    }
}

/// The single native call of a generated callable
#[derive(Debug, Clone)]
pub struct Invocation {
    pub symbol: String,
    pub args: SmallVec<[Var; 8]>,
    /// Slot receiving the return value; `None` for void
    pub capture: Option<Var>,
}

impl Invocation {
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn run(&self, frame: &mut Frame, env: &Env<'_>, expected: usize) -> Result<()> {
        let args = self
            .args
            .iter()
            .map(|var| frame.native(*var))
            .collect::<Result<SmallVec<[NativeValue; 8]>>>()?;

        if args.len() != expected {
            return Err(CallError::ArgCountMismatch {
                symbol: self.symbol.clone(),
                expected,
                got: args.len(),
            }
            .into());
        }

        crate::logging::log_native_call(&self.symbol, args.len());
        let span = tracing::debug_span!("native_call", symbol = %self.symbol);
        let _enter = span.enter();
        let result = env
            .invoker
            .invoke(&NativeCall::new(&self.symbol, &args, env.context))?;

        if let Some(capture) = self.capture {
            frame.set_native(capture, result);
        }
        Ok(())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(capture) = self.capture {
            write!(f, "{} = ", capture)?;
        }
        write!(f, "{}(", self.symbol)?;
        for (i, var) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", var)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::LengthOf { array, dest, .. } => write!(f, "{} = len({})", dest, array),
            Step::ToNative { src, dest, ty, .. } => write!(f, "{} = to_native({}: {})", dest, src, ty),
            Step::Opaque { src, dest, .. } => write!(f, "{} = opaque({})", dest, src),
            Step::Callback { src, dest, retention, .. } => {
                write!(f, "{} = trampoline({}, {:?})", dest, src, retention)
            }
            Step::Retain { trampoline, values } => {
                write!(f, "retain({}", trampoline)?;
                for var in values {
                    write!(f, ", {}", var)?;
                }
                f.write_str(")")
            }
            Step::AllocOut { dest } => write!(f, "{} = alloc_out()", dest),
            Step::AllocCaller { dest, ty } => write!(f, "{} = alloc_caller({})", dest, ty),
            Step::StoreSlot { slot, src } => write!(f, "*{} = {}", slot, src),
            Step::CheckError { slot } => write!(f, "check_error(*{})", slot),
            Step::ReadSlot { slot, dest } => write!(f, "{} = *{}", dest, slot),
            Step::ToManaged { src, dest, ty, length } => match length {
                Some(len) => write!(f, "{} = to_managed({}: {}, len={})", dest, src, ty, len),
                None => write!(f, "{} = to_managed({}: {})", dest, src, ty),
            },
            Step::WrapCaller { src, dest, ty } => write!(f, "{} = wrap_caller({}: {})", dest, src, ty),
            Step::Construct { src, dest, ty } => write!(f, "{} = construct({}: {})", dest, src, ty),
            Step::RefSink { src, symbol } => write!(f, "{}({})", symbol, src),
            Step::Release { src, ownership, .. } => write!(f, "release({}, {:?})", src, ownership),
            Step::DiscardCaller { src, wrapped } => write!(f, "discard({}) unless {}", src, wrapped),
            Step::FreeSlot { slot } => write!(f, "free({})", slot),
            Step::Untrack { src } => write!(f, "untrack({})", src),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::SymbolTable;

    fn env<'a>(invoker: &'a SymbolTable, ctx: &'a NativeContext) -> Env<'a> {
        Env {
            invoker,
            context: ctx,
            symbol: "test",
        }
    }

    #[test]
    fn test_length_of_absent_is_zero() {
        let table = SymbolTable::new();
        let ctx = NativeContext::new();
        let mut frame = Frame::new(2);
        frame.set_value(Var(0), Value::Nil);
        Step::LengthOf {
            array: Var(0),
            dest: Var(1),
            ty: TypeDescriptor::int32(),
            name: "a".into(),
        }
        .run(&mut frame, &env(&table, &ctx))
        .unwrap();
        assert_eq!(frame.native(Var(1)).unwrap(), NativeValue::Int(0));
    }

    #[test]
    fn test_length_of_checks_holder_width() {
        let table = SymbolTable::new();
        let ctx = NativeContext::new();
        let step = |ty: TypeDescriptor| Step::LengthOf {
            array: Var(0),
            dest: Var(1),
            ty,
            name: "n".into(),
        };
        let mut frame = Frame::new(2);
        frame.set_value(Var(0), Value::ints(vec![7; 256]));

        let err = step(TypeDescriptor::uint8())
            .run(&mut frame, &env(&table, &ctx))
            .unwrap_err();
        assert!(matches!(err, MarshalError::ArgumentType { ref name, .. } if name == "n"));
        assert!(frame.native_opt(Var(1)).is_none());

        step(TypeDescriptor::uint32())
            .run(&mut frame, &env(&table, &ctx))
            .unwrap();
        assert_eq!(frame.native(Var(1)).unwrap(), NativeValue::UInt(256));
    }

    #[test]
    fn test_check_error_consumes_record() {
        let table = SymbolTable::new();
        let ctx = NativeContext::new();
        let record = ctx.heap.alloc(NativeBlock::Error {
            domain: "test-domain".into(),
            code: 3,
            message: "boom".into(),
        });
        let slot = ctx.heap.alloc_cell(NativeValue::Pointer(record));
        let mut frame = Frame::new(1);
        frame.set_native(Var(0), NativeValue::Pointer(slot));

        let err = Step::CheckError { slot: Var(0) }
            .run(&mut frame, &env(&table, &ctx))
            .unwrap_err();
        assert_eq!(
            err,
            MarshalError::NativeCall {
                message: "boom".into(),
                domain: "test-domain".into(),
                code: 3
            }
        );
        assert!(!ctx.heap.contains(record));
    }

    #[test]
    fn test_cleanup_skips_unfilled_slots() {
        let table = SymbolTable::new();
        let ctx = NativeContext::new();
        let mut frame = Frame::new(1);
        Step::FreeSlot { slot: Var(0) }
            .run(&mut frame, &env(&table, &ctx))
            .unwrap();
        Step::Release {
            src: Var(0),
            ty: TypeDescriptor::utf8(),
            ownership: Ownership::Everything,
        }
        .run(&mut frame, &env(&table, &ctx))
        .unwrap();
    }

    #[test]
    fn test_opaque_boxes_plain_values() {
        let table = SymbolTable::new();
        let ctx = NativeContext::new();
        let mut frame = Frame::new(2);
        frame.set_value(Var(0), Value::str("data"));
        Step::Opaque {
            src: Var(0),
            dest: Var(1),
            name: "user_data".into(),
        }
        .run(&mut frame, &env(&table, &ctx))
        .unwrap();

        let ptr = frame.native(Var(1)).unwrap().as_ptr();
        match ctx.identity.resolve(ptr) {
            Some(Value::Boxed(boxed)) => assert_eq!(boxed.value(), &Value::str("data")),
            other => panic!("unexpected {:?}", other),
        }
        drop(frame);
        assert_eq!(ctx.identity.resolve(ptr), None);
    }

    #[test]
    fn test_invocation_display() {
        let inv = Invocation {
            symbol: "f".into(),
            args: SmallVec::from_slice(&[Var(0), Var(1)]),
            capture: Some(Var(2)),
        };
        assert_eq!(inv.to_string(), "_v2 = f(_v0, _v1)");
    }
}
