//! Type marshaling - managed ↔ native conversions
//!
//! Design: one exhaustive match over the tag set per direction. Buffers are
//! allocated on the native heap; `release` frees whatever part of a buffer
//! the binding side owns after the call.

use super::call::NativeContext;
use super::memory::{wrong_kind, NativeBlock};
use super::trampoline::Retention;
use super::value::{Instance, NativePtr, NativeValue, Value};
use crate::core::types::{Direction, FloatWidth, IntWidth, Ownership, TypeDescriptor, TypeTag};
use crate::errors::{MarshalError, MemoryError, Result};

/// Convert a managed value to its native representation
///
/// `name` labels conversion errors.
pub fn to_native(value: &Value, ty: &TypeDescriptor, ctx: &NativeContext, name: &str) -> Result<NativeValue> {
    let mismatch = |expected: &str| MarshalError::argument_type(name, expected, value.kind());

    match ty.tag() {
        TypeTag::Void | TypeTag::Pointer => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Pointer(p) => Ok(NativeValue::Pointer(*p)),
            Value::Instance(inst) => Ok(NativeValue::Pointer(inst.ptr())),
            Value::Boxed(boxed) => Ok(NativeValue::Pointer(boxed.ptr())),
            _ => Err(mismatch("pointer")),
        },
        TypeTag::Boolean => match value {
            Value::Bool(b) => Ok(NativeValue::Int(*b as i64)),
            Value::Int(v) => Ok(NativeValue::Int((*v != 0) as i64)),
            Value::UInt(v) => Ok(NativeValue::Int((*v != 0) as i64)),
            _ => Err(mismatch("bool")),
        },
        TypeTag::Integer { width, signed } => int_to_native(value, *width, *signed, name),
        TypeTag::Float(width) => {
            let v = match value {
                Value::Float(v) => *v,
                Value::Int(v) => *v as f64,
                Value::UInt(v) => *v as f64,
                _ => return Err(mismatch("float")),
            };
            Ok(NativeValue::Float(round_float(v, *width)))
        }
        TypeTag::Utf8 => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Str(s) => Ok(NativeValue::Pointer(ctx.heap.alloc_str(s))),
            _ => Err(mismatch("str")),
        },
        TypeTag::Enum(info) => match value {
            Value::Symbol(member) | Value::Str(member) => info
                .value_of(member)
                .map(NativeValue::Int)
                .ok_or_else(|| mismatch(&format!("member of {}.{}", info.namespace, info.name))),
            Value::Int(v) => Ok(NativeValue::Int(*v)),
            _ => Err(mismatch("enum member")),
        },
        TypeTag::Flags(info) => {
            let resolve = |member: &Value| -> Result<u64> {
                match member {
                    Value::Symbol(s) | Value::Str(s) => info
                        .value_of(s)
                        .map(|v| v as u64)
                        .ok_or_else(|| MarshalError::argument_type(name, "flag member", s.clone())),
                    Value::Int(v) => Ok(*v as u64),
                    Value::UInt(v) => Ok(*v),
                    other => Err(MarshalError::argument_type(name, "flag member", other.kind())),
                }
            };
            match value {
                Value::List(members) => members
                    .iter()
                    .try_fold(0u64, |acc, m| resolve(m).map(|bits| acc | bits))
                    .map(NativeValue::UInt),
                other => resolve(other).map(NativeValue::UInt),
            }
        }
        TypeTag::Struct(_) | TypeTag::Object(_) | TypeTag::Interface(_) => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Instance(inst) => Ok(NativeValue::Pointer(inst.ptr())),
            Value::Pointer(p) => Ok(NativeValue::Pointer(*p)),
            _ => Err(mismatch(&ty.to_string())),
        },
        TypeTag::Array | TypeTag::FixedCArray | TypeTag::ZeroTerminatedArray | TypeTag::StringVector => {
            let zero_terminated = matches!(ty.tag(), TypeTag::ZeroTerminatedArray | TypeTag::StringVector);
            match value {
                Value::Nil => Ok(NativeValue::NULL),
                Value::List(_) | Value::Bytes(_) => {
                    let items = sequence_items(value);
                    if let Some(expected) = ty.fixed_size() {
                        if items.len() != expected {
                            return Err(MarshalError::SizeMismatch {
                                name: name.to_string(),
                                expected,
                                actual: items.len(),
                            });
                        }
                    }
                    let natives = elements_to_native(&items, element_of(ty, name)?, ctx, name)?;
                    Ok(NativeValue::Pointer(ctx.heap.alloc(NativeBlock::Array {
                        items: natives,
                        zero_terminated,
                    })))
                }
                _ => Err(mismatch("list")),
            }
        }
        TypeTag::ByteArray => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Bytes(bytes) => Ok(NativeValue::Pointer(ctx.heap.alloc(NativeBlock::Bytes(bytes.clone())))),
            Value::List(items) => {
                let bytes = items
                    .iter()
                    .map(|item| match int_to_native(item, IntWidth::W8, false, name)? {
                        NativeValue::UInt(b) => Ok(b as u8),
                        _ => Err(MarshalError::argument_type(name, "byte", item.kind())),
                    })
                    .collect::<Result<Vec<u8>>>()?;
                Ok(NativeValue::Pointer(ctx.heap.alloc(NativeBlock::Bytes(bytes))))
            }
            _ => Err(mismatch("bytes")),
        },
        TypeTag::GList | TypeTag::GSList => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::List(items) if items.is_empty() => Ok(NativeValue::NULL),
            Value::List(items) => {
                let natives = elements_to_native(items, element_of(ty, name)?, ctx, name)?;
                Ok(NativeValue::Pointer(ctx.heap.alloc(NativeBlock::List {
                    items: natives,
                    doubly_linked: matches!(ty.tag(), TypeTag::GList),
                })))
            }
            _ => Err(mismatch("list")),
        },
        TypeTag::GHashTable => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Map(pairs) => {
                let key_ty = key_of(ty, name)?;
                let value_ty = element_of(ty, name)?;
                let mut natives = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let entry = to_native(k, key_ty, ctx, name).and_then(|nk| {
                        match to_native(v, value_ty, ctx, name) {
                            Ok(nv) => Ok((nk, nv)),
                            Err(err) => {
                                release(nk, key_ty, Ownership::Everything, ctx)?;
                                Err(err)
                            }
                        }
                    });
                    match entry {
                        Ok(pair) => natives.push(pair),
                        Err(err) => {
                            release_pairs(&natives, key_ty, value_ty, ctx)?;
                            return Err(err);
                        }
                    }
                }
                Ok(NativeValue::Pointer(ctx.heap.alloc(NativeBlock::HashTable(natives))))
            }
            _ => Err(mismatch("map")),
        },
        TypeTag::Callback(info) => match value {
            Value::Nil => Ok(NativeValue::NULL),
            Value::Pointer(p) => Ok(NativeValue::Pointer(*p)),
            Value::Callable(closure) => Ok(NativeValue::Pointer(ctx.callbacks.register(
                closure.clone(),
                info.clone(),
                Retention::Call,
            ))),
            _ => Err(mismatch("callable")),
        },
    }
}

/// Convert a native value to a managed one
///
/// `length` sizes C arrays without a fixed size or terminator.
pub fn to_managed(native: NativeValue, ty: &TypeDescriptor, length: Option<usize>, ctx: &NativeContext) -> Result<Value> {
    let ptr = native.as_ptr();

    match ty.tag() {
        TypeTag::Void | TypeTag::Pointer => {
            if ptr.is_null() {
                Ok(Value::Nil)
            } else {
                Ok(ctx.identity.resolve(ptr).unwrap_or(Value::Pointer(ptr)))
            }
        }
        TypeTag::Boolean => Ok(Value::Bool(native.as_i64() != 0)),
        TypeTag::Integer { width, signed } => Ok(int_to_managed(native, *width, *signed)),
        TypeTag::Float(width) => Ok(Value::Float(round_float(native.as_f64(), *width))),
        TypeTag::Utf8 => {
            if ptr.is_null() {
                Ok(Value::Nil)
            } else {
                Ok(Value::Str(ctx.heap.read_str(ptr)?))
            }
        }
        TypeTag::Enum(info) => {
            let v = native.as_i64() as i32 as i64;
            Ok(info
                .name_of(v)
                .map(Value::symbol)
                .unwrap_or(Value::Int(v)))
        }
        TypeTag::Flags(_) => Ok(Value::UInt(native.as_u64() & u32::MAX as u64)),
        TypeTag::Struct(reg) | TypeTag::Object(reg) | TypeTag::Interface(reg) => {
            if ptr.is_null() {
                Ok(Value::Nil)
            } else {
                ctx.identity.wrap_instance(ptr, &reg.qualified_name())
            }
        }
        TypeTag::Array | TypeTag::FixedCArray => {
            if ptr.is_null() {
                return Ok(Value::Nil);
            }
            let count = ty.fixed_size().or(length).ok_or_else(|| {
                MarshalError::not_implemented(format!("reading {} without a known length", ty))
            })?;
            let items = ctx.heap.read_items(ptr)?;
            if count > items.len() {
                return Err(MemoryError::OutOfBounds {
                    ptr,
                    requested: count,
                    available: items.len(),
                }
                .into());
            }
            elements_to_managed(&items[..count], element_of(ty, "array")?, ctx)
        }
        TypeTag::ZeroTerminatedArray | TypeTag::StringVector => {
            if ptr.is_null() {
                return Ok(Value::Nil);
            }
            let items = ctx.heap.with_block(ptr, |block| match block {
                NativeBlock::Array { items, zero_terminated: true } => Ok(items.clone()),
                other => Err(wrong_kind(ptr, "zero-terminated array", other)),
            })??;
            elements_to_managed(&items, element_of(ty, "array")?, ctx)
        }
        TypeTag::ByteArray => {
            if ptr.is_null() {
                return Ok(Value::Nil);
            }
            let bytes = ctx.heap.with_block(ptr, |block| match block {
                NativeBlock::Bytes(bytes) => Ok(bytes.clone()),
                other => Err(wrong_kind(ptr, "bytes", other)),
            })??;
            Ok(Value::Bytes(bytes))
        }
        TypeTag::GList | TypeTag::GSList => {
            if ptr.is_null() {
                return Ok(Value::List(Vec::new()));
            }
            let items = ctx.heap.read_items(ptr)?;
            elements_to_managed(&items, element_of(ty, "list")?, ctx)
        }
        TypeTag::GHashTable => {
            if ptr.is_null() {
                return Ok(Value::Nil);
            }
            let pairs = ctx.heap.with_block(ptr, |block| match block {
                NativeBlock::HashTable(pairs) => Ok(pairs.clone()),
                other => Err(wrong_kind(ptr, "hash table", other)),
            })??;
            let key_ty = key_of(ty, "hash table")?;
            let value_ty = element_of(ty, "hash table")?;
            pairs
                .into_iter()
                .map(|(k, v)| Ok((to_managed(k, key_ty, None, ctx)?, to_managed(v, value_ty, None, ctx)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Map)
        }
        TypeTag::Callback(_) => {
            if ptr.is_null() {
                Ok(Value::Nil)
            } else {
                Ok(ctx
                    .callbacks
                    .lookup(ptr)
                    .map(Value::Callable)
                    .unwrap_or(Value::Pointer(ptr)))
            }
        }
    }
}

/// Free the part of a native value the binding side owns
pub fn release(native: NativeValue, ty: &TypeDescriptor, ownership: Ownership, ctx: &NativeContext) -> Result<()> {
    let ptr = native.as_ptr();
    if ptr.is_null() {
        return Ok(());
    }

    match ty.tag() {
        TypeTag::Callback(_) => {
            ctx.callbacks.release_call_scoped(ptr);
            Ok(())
        }
        _ if ownership == Ownership::None => Ok(()),
        TypeTag::Utf8 | TypeTag::ByteArray => Ok(ctx.heap.free(ptr)?),
        TypeTag::Array
        | TypeTag::FixedCArray
        | TypeTag::ZeroTerminatedArray
        | TypeTag::StringVector
        | TypeTag::GList
        | TypeTag::GSList => {
            let block = ctx.heap.take(ptr)?;
            if ownership == Ownership::Everything {
                let element = element_of(ty, "container")?;
                if element.is_buffer() {
                    if let NativeBlock::Array { items, .. } | NativeBlock::List { items, .. } = block {
                        for item in items {
                            release(item, element, Ownership::Everything, ctx)?;
                        }
                    }
                }
            }
            Ok(())
        }
        TypeTag::GHashTable => {
            let block = ctx.heap.take(ptr)?;
            if ownership == Ownership::Everything {
                if let NativeBlock::HashTable(pairs) = block {
                    release_pairs(&pairs, key_of(ty, "hash table")?, element_of(ty, "hash table")?, ctx)?;
                }
            }
            Ok(())
        }
        TypeTag::Void
        | TypeTag::Pointer
        | TypeTag::Boolean
        | TypeTag::Integer { .. }
        | TypeTag::Float(_)
        | TypeTag::Enum(_)
        | TypeTag::Flags(_)
        | TypeTag::Struct(_)
        | TypeTag::Object(_)
        | TypeTag::Interface(_) => Ok(()),
    }
}

/// Element count of a managed sequence; absent sequences count as empty
pub fn length_of(value: &Value, name: &str) -> Result<usize> {
    match value {
        Value::Nil => Ok(0),
        Value::List(items) => Ok(items.len()),
        Value::Bytes(bytes) => Ok(bytes.len()),
        Value::Str(s) => Ok(s.len()),
        Value::Map(pairs) => Ok(pairs.len()),
        other => Err(MarshalError::argument_type(name, "sequence", other.kind())),
    }
}

/// Wrap caller-allocated storage; the wrapper owns the block
pub fn wrap_owned(ptr: NativePtr, ty: &TypeDescriptor, ctx: &NativeContext) -> Result<Value> {
    if ptr.is_null() {
        return Err(MarshalError::IdentityResolution { context: ty.to_string() });
    }
    let value = Value::Instance(Instance::owning(ptr, ty.to_string(), ctx.heap.clone()));
    ctx.identity.remember(ptr, &value)?;
    Ok(value)
}

fn int_to_native(value: &Value, width: IntWidth, signed: bool, name: &str) -> Result<NativeValue> {
    let out_of_range = |shown: String| {
        MarshalError::argument_type(
            name,
            format!("{}{}", if signed { "gint" } else { "guint" }, width.bits()),
            shown,
        )
    };
    let wide: i128 = match value {
        Value::Int(v) => *v as i128,
        Value::UInt(v) => *v as i128,
        Value::Bool(b) => *b as i128,
        other => return Err(MarshalError::argument_type(name, "int", other.kind())),
    };
    if signed {
        let (min, max) = width.signed_range();
        if wide < min as i128 || wide > max as i128 {
            return Err(out_of_range(wide.to_string()));
        }
        Ok(NativeValue::Int(wide as i64))
    } else {
        if wide < 0 || wide > width.unsigned_max() as i128 {
            return Err(out_of_range(wide.to_string()));
        }
        Ok(NativeValue::UInt(wide as u64))
    }
}

fn int_to_managed(native: NativeValue, width: IntWidth, signed: bool) -> Value {
    let raw = native.as_u64();
    let bits = width.bits();
    if signed {
        let shift = 64 - bits;
        Value::Int(((raw << shift) as i64) >> shift)
    } else if bits == 64 {
        Value::UInt(raw)
    } else {
        Value::UInt(raw & ((1u64 << bits) - 1))
    }
}

fn round_float(v: f64, width: FloatWidth) -> f64 {
    match width {
        FloatWidth::F32 => v as f32 as f64,
        FloatWidth::F64 => v,
    }
}

fn sequence_items(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        Value::Bytes(bytes) => bytes.iter().map(|b| Value::Int(*b as i64)).collect(),
        _ => Vec::new(),
    }
}

fn element_of<'t>(ty: &'t TypeDescriptor, name: &str) -> Result<&'t TypeDescriptor> {
    ty.element()
        .ok_or_else(|| MarshalError::unsupported_because(name, ty, Direction::In, "missing element type"))
}

fn key_of<'t>(ty: &'t TypeDescriptor, name: &str) -> Result<&'t TypeDescriptor> {
    ty.key()
        .ok_or_else(|| MarshalError::unsupported_because(name, ty, Direction::In, "missing key type"))
}

/// Convert elements; on failure, frees the element buffers converted so far
fn elements_to_native(items: &[Value], element: &TypeDescriptor, ctx: &NativeContext, name: &str) -> Result<Vec<NativeValue>> {
    let mut natives = Vec::with_capacity(items.len());
    for item in items {
        match to_native(item, element, ctx, name) {
            Ok(native) => natives.push(native),
            Err(err) => {
                for native in natives {
                    release(native, element, Ownership::Everything, ctx)?;
                }
                return Err(err);
            }
        }
    }
    Ok(natives)
}

fn elements_to_managed(items: &[NativeValue], element: &TypeDescriptor, ctx: &NativeContext) -> Result<Value> {
    items
        .iter()
        .map(|item| to_managed(*item, element, None, ctx))
        .collect::<Result<Vec<_>>>()
        .map(Value::List)
}

fn release_pairs(
    pairs: &[(NativeValue, NativeValue)],
    key_ty: &TypeDescriptor,
    value_ty: &TypeDescriptor,
    ctx: &NativeContext,
) -> Result<()> {
    for (k, v) in pairs {
        release(*k, key_ty, Ownership::Everything, ctx)?;
        release(*v, value_ty, Ownership::Everything, ctx)?;
    }
    Ok(())
}
