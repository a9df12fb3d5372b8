//! Conversion and native-service tests for the interop module

use super::marshal::*;
use super::*;
use crate::core::types::{
    CallbackInfo, EnumInfo, FloatWidth, IntWidth, Ownership, RegisteredType, TypeDescriptor, TypeTag,
};
use crate::errors::{CallError, MarshalError, MemoryError};
use std::sync::Arc;

fn color() -> Arc<EnumInfo> {
    Arc::new(EnumInfo::new("Test", "Color", [("red", 0), ("green", 1), ("blue", 2)]))
}

fn bits() -> Arc<EnumInfo> {
    Arc::new(EnumInfo::new("Test", "Bits", [("a", 1), ("b", 2), ("c", 4)]))
}

fn widget() -> TypeDescriptor {
    TypeDescriptor::object(Arc::new(RegisteredType::object("Test", "Widget")))
}

#[test]
fn test_integer_range_checks() {
    let ctx = NativeContext::new();
    let i32_ty = TypeDescriptor::int32();
    let u8_ty = TypeDescriptor::uint8();

    assert_eq!(
        to_native(&Value::Int(i32::MAX as i64), &i32_ty, &ctx, "x").unwrap(),
        NativeValue::Int(i32::MAX as i64)
    );
    let err = to_native(&Value::Int(i32::MAX as i64 + 1), &i32_ty, &ctx, "x").unwrap_err();
    assert!(matches!(err, MarshalError::ArgumentType { .. }));

    assert_eq!(to_native(&Value::Int(255), &u8_ty, &ctx, "b").unwrap(), NativeValue::UInt(255));
    assert!(to_native(&Value::Int(-1), &u8_ty, &ctx, "b").is_err());
    assert!(to_native(&Value::str("1"), &i32_ty, &ctx, "x").is_err());
}

#[test]
fn test_integer_truncation_on_the_way_out() {
    let ctx = NativeContext::new();
    assert_eq!(
        to_managed(NativeValue::Int(-1), &TypeDescriptor::int32(), None, &ctx).unwrap(),
        Value::Int(-1)
    );
    assert_eq!(
        to_managed(NativeValue::UInt(0x1_0000_0005), &TypeDescriptor::uint32(), None, &ctx).unwrap(),
        Value::UInt(5)
    );
    let i8_ty = TypeDescriptor::int(IntWidth::W8, true);
    assert_eq!(to_managed(NativeValue::Int(0xff), &i8_ty, None, &ctx).unwrap(), Value::Int(-1));
}

#[test]
fn test_float_and_boolean() {
    let ctx = NativeContext::new();
    let f32_ty = TypeDescriptor::new(TypeTag::Float(FloatWidth::F32));
    let native = to_native(&Value::Float(0.1), &f32_ty, &ctx, "f").unwrap();
    assert_eq!(native, NativeValue::Float(0.1f32 as f64));
    assert_eq!(
        to_native(&Value::Int(3), &TypeDescriptor::double(), &ctx, "d").unwrap(),
        NativeValue::Float(3.0)
    );

    let b = TypeDescriptor::boolean();
    assert_eq!(to_native(&Value::Bool(true), &b, &ctx, "b").unwrap(), NativeValue::Int(1));
    assert_eq!(to_managed(NativeValue::Int(7), &b, None, &ctx).unwrap(), Value::Bool(true));
    assert_eq!(to_managed(NativeValue::Int(0), &b, None, &ctx).unwrap(), Value::Bool(false));
}

#[test]
fn test_utf8_round_trip_and_release() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::utf8();
    let native = to_native(&Value::str("héllo"), &ty, &ctx, "s").unwrap();
    assert_eq!(ctx.heap.live_blocks(), 1);
    assert_eq!(to_managed(native, &ty, None, &ctx).unwrap(), Value::str("héllo"));

    release(native, &ty, Ownership::None, &ctx).unwrap();
    assert_eq!(ctx.heap.live_blocks(), 1);
    release(native, &ty, Ownership::Everything, &ctx).unwrap();
    assert_eq!(ctx.heap.live_blocks(), 0);

    assert_eq!(to_native(&Value::Nil, &ty, &ctx, "s").unwrap(), NativeValue::NULL);
    assert_eq!(to_managed(NativeValue::NULL, &ty, None, &ctx).unwrap(), Value::Nil);
}

#[test]
fn test_enum_and_flags() {
    let ctx = NativeContext::new();
    let enum_ty = TypeDescriptor::new(TypeTag::Enum(color()));
    assert_eq!(to_native(&Value::symbol("blue"), &enum_ty, &ctx, "c").unwrap(), NativeValue::Int(2));
    assert_eq!(to_native(&Value::Int(1), &enum_ty, &ctx, "c").unwrap(), NativeValue::Int(1));
    assert!(to_native(&Value::symbol("mauve"), &enum_ty, &ctx, "c").is_err());
    assert_eq!(to_managed(NativeValue::Int(1), &enum_ty, None, &ctx).unwrap(), Value::symbol("green"));
    assert_eq!(to_managed(NativeValue::Int(9), &enum_ty, None, &ctx).unwrap(), Value::Int(9));

    let flags_ty = TypeDescriptor::new(TypeTag::Flags(bits()));
    let members = Value::list([Value::symbol("a"), Value::symbol("c")]);
    assert_eq!(to_native(&members, &flags_ty, &ctx, "f").unwrap(), NativeValue::UInt(5));
    assert_eq!(to_managed(NativeValue::UInt(5), &flags_ty, None, &ctx).unwrap(), Value::UInt(5));
}

#[test]
fn test_string_vector_ownership() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::strv();
    let value = Value::list([Value::str("a"), Value::str("b")]);

    let native = to_native(&value, &ty, &ctx, "names").unwrap();
    assert_eq!(ctx.heap.live_blocks(), 3);
    assert_eq!(to_managed(native, &ty, None, &ctx).unwrap(), value);
    release(native, &ty, Ownership::Everything, &ctx).unwrap();
    assert_eq!(ctx.heap.live_blocks(), 0);

    let native = to_native(&value, &ty, &ctx, "names").unwrap();
    release(native, &ty, Ownership::Container, &ctx).unwrap();
    assert_eq!(ctx.heap.live_blocks(), 2);
}

#[test]
fn test_fixed_size_checked_before_allocation() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::fixed_array_of(TypeDescriptor::utf8(), 3);
    let err = to_native(&Value::list([Value::str("x")]), &ty, &ctx, "triple").unwrap_err();
    assert_eq!(
        err,
        MarshalError::SizeMismatch {
            name: "triple".to_string(),
            expected: 3,
            actual: 1,
        }
    );
    assert_eq!(ctx.heap.stats().allocations, 0);
}

#[test]
fn test_failed_element_frees_converted_elements() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::zero_terminated_of(TypeDescriptor::utf8());
    let value = Value::list([Value::str("ok"), Value::Int(3)]);
    assert!(to_native(&value, &ty, &ctx, "names").is_err());
    assert_eq!(ctx.heap.live_blocks(), 0);
}

#[test]
fn test_sized_array_reads() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::array_of(TypeDescriptor::int32());
    let native = to_native(&Value::ints([3, 1, 4]), &ty, &ctx, "ints").unwrap();

    assert_eq!(to_managed(native, &ty, Some(2), &ctx).unwrap(), Value::ints([3, 1]));

    let err = to_managed(native, &ty, Some(5), &ctx).unwrap_err();
    assert!(matches!(
        err,
        MarshalError::Memory(MemoryError::OutOfBounds { requested: 5, available: 3, .. })
    ));

    let err = to_managed(native, &ty, None, &ctx).unwrap_err();
    assert!(matches!(err, MarshalError::NotImplemented { .. }));
}

#[test]
fn test_lists_and_byte_arrays() {
    let ctx = NativeContext::new();
    let list_ty = TypeDescriptor::glist_of(TypeDescriptor::int32());
    assert_eq!(to_native(&Value::List(Vec::new()), &list_ty, &ctx, "l").unwrap(), NativeValue::NULL);
    assert_eq!(to_managed(NativeValue::NULL, &list_ty, None, &ctx).unwrap(), Value::List(Vec::new()));

    let native = to_native(&Value::ints([1, 2]), &list_ty, &ctx, "l").unwrap();
    assert_eq!(to_managed(native, &list_ty, None, &ctx).unwrap(), Value::ints([1, 2]));

    let bytes_ty = TypeDescriptor::byte_array();
    let native = to_native(&Value::ints([0, 127, 255]), &bytes_ty, &ctx, "data").unwrap();
    assert_eq!(to_managed(native, &bytes_ty, None, &ctx).unwrap(), Value::Bytes(vec![0, 127, 255]));
    assert!(to_native(&Value::ints([256]), &bytes_ty, &ctx, "data").is_err());
}

#[test]
fn test_hash_table_round_trip() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::hash_table_of(TypeDescriptor::utf8(), TypeDescriptor::int32());
    let value = Value::Map(vec![(Value::str("one"), Value::Int(1)), (Value::str("two"), Value::Int(2))]);

    let native = to_native(&value, &ty, &ctx, "table").unwrap();
    assert_eq!(ctx.heap.live_blocks(), 3);
    assert_eq!(to_managed(native, &ty, None, &ctx).unwrap(), value);
    release(native, &ty, Ownership::Everything, &ctx).unwrap();
    assert_eq!(ctx.heap.live_blocks(), 0);

    let bad = Value::Map(vec![(Value::str("one"), Value::str("x"))]);
    assert!(to_native(&bad, &ty, &ctx, "table").is_err());
    assert_eq!(ctx.heap.live_blocks(), 0);
}

#[test]
fn test_opaque_pointers_resolve_through_identity() {
    let ctx = NativeContext::new();
    let ty = TypeDescriptor::pointer();
    assert!(to_native(&Value::Int(7), &ty, &ctx, "data").is_err());

    let boxed = ctx.identity.store(Value::Int(7));
    let native = to_native(&Value::Boxed(boxed.clone()), &ty, &ctx, "data").unwrap();
    assert_eq!(native, NativeValue::Pointer(boxed.ptr()));
    assert_eq!(to_managed(native, &ty, None, &ctx).unwrap(), Value::Boxed(boxed));

    let unknown = NativeValue::Pointer(NativePtr(0x1000));
    assert_eq!(to_managed(unknown, &ty, None, &ctx).unwrap(), Value::Pointer(NativePtr(0x1000)));
}

#[test]
fn test_objects_keep_identity() {
    let ctx = NativeContext::new();
    let ptr = NativeValue::Pointer(NativePtr(0x4000));
    let first = to_managed(ptr, &widget(), None, &ctx).unwrap();
    let second = to_managed(ptr, &widget(), None, &ctx).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.as_instance().map(|i| i.type_name()), Some("Test.Widget"));

    drop(first);
    drop(second);
    assert!(ctx.identity.is_empty());
    assert_eq!(to_managed(NativeValue::NULL, &widget(), None, &ctx).unwrap(), Value::Nil);
}

#[test]
fn test_callbacks_are_call_scoped() {
    let ctx = NativeContext::new();
    let info = Arc::new(CallbackInfo::new("Test", "Func", vec![], TypeDescriptor::void()));
    let ty = TypeDescriptor::callback(info);
    let closure = Value::callable(|_| Ok(Value::Nil));

    let native = to_native(&closure, &ty, &ctx, "func").unwrap();
    assert_eq!(ctx.callbacks.retention_of(native.as_ptr()), Some(Retention::Call));
    assert_eq!(to_managed(native, &ty, None, &ctx).unwrap(), closure);

    release(native, &ty, Ownership::None, &ctx).unwrap();
    assert_eq!(ctx.callbacks.retained(), 0);
}

#[test]
fn test_length_of() {
    assert_eq!(length_of(&Value::Nil, "xs").unwrap(), 0);
    assert_eq!(length_of(&Value::ints([1, 2, 3]), "xs").unwrap(), 3);
    assert_eq!(length_of(&Value::Bytes(vec![1]), "xs").unwrap(), 1);
    assert!(length_of(&Value::Int(3), "xs").is_err());
}

#[test]
fn test_symbol_table_dispatch() {
    let ctx = NativeContext::new();
    let table = SymbolTable::new().with("double_it", |call| {
        call.expect_args(1)?;
        Ok(NativeValue::Int(call.int(0)? * 2))
    });
    assert!(table.contains("double_it"));

    let args = [NativeValue::Int(21)];
    let result = table.invoke(&NativeCall::new("double_it", &args, &ctx)).unwrap();
    assert_eq!(result, NativeValue::Int(42));

    let err = table.invoke(&NativeCall::new("missing", &args, &ctx)).unwrap_err();
    assert_eq!(err, CallError::SymbolNotFound("missing".to_string()));

    let err = table.invoke(&NativeCall::new("double_it", &[], &ctx)).unwrap_err();
    assert!(matches!(err, CallError::ArgCountMismatch { expected: 1, got: 0, .. }));
    assert_eq!(table.calls(), 2);
}

#[test]
fn test_native_call_out_slots_and_errors() {
    let ctx = NativeContext::new();
    let slot = ctx.heap.alloc_cell(NativeValue::Int(5));
    let args = [NativeValue::Pointer(slot)];
    let call = NativeCall::new("f", &args, &ctx);

    assert_eq!(call.read_slot(0).unwrap(), NativeValue::Int(5));
    call.write_out(0, NativeValue::Int(6)).unwrap();
    assert_eq!(ctx.heap.read_cell(slot).unwrap(), NativeValue::Int(6));

    call.fail(0, "test-error-quark", 3, "broken").unwrap();
    let record = ctx.heap.read_cell(slot).unwrap().as_ptr();
    let kind = ctx.heap.with_block(record, |block| block.kind()).unwrap();
    assert_eq!(kind, "error");
}

#[test]
fn test_counters_snapshot() {
    let counters = InteropCounters::new();
    counters.record_call();
    counters.record_call();
    counters.record_native_error();
    counters.record_binding();
    counters.record_cleanup(3);

    let stats = counters.snapshot(4, 1);
    assert_eq!(stats.calls_made, 2);
    assert_eq!(stats.native_errors, 1);
    assert_eq!(stats.cleanup_steps, 3);
    assert_eq!((stats.cache_hits, stats.cache_misses), (4, 1));

    counters.reset();
    assert_eq!(counters.snapshot(0, 0), InteropStats::default());
}
