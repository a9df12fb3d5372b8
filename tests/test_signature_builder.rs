use gimarshal::builder::{GeneratedCallable, SignatureBuilder, Step};
use gimarshal::config::BindingConfig;
use gimarshal::core::{ArgumentSpec, CallbackInfo, FunctionInfo, Ownership, RegisteredType, TypeDescriptor};
use gimarshal::errors::{MarshalError, Result};
use std::sync::Arc;

fn build(info: &FunctionInfo) -> Result<GeneratedCallable> {
    SignatureBuilder::new(info, &BindingConfig::default()).build()
}

fn int_array(length: usize) -> TypeDescriptor {
    TypeDescriptor::array_of(TypeDescriptor::int32()).with_length_index(length)
}

fn widget() -> TypeDescriptor {
    TypeDescriptor::object(Arc::new(RegisteredType::object("Test", "Widget")))
}

#[test]
fn test_inbound_array_hides_length_parameter() {
    let info = FunctionInfo::new("Test", "sum", "test_sum")
        .with_arg(ArgumentSpec::input("ints", int_array(1)))
        .with_arg(ArgumentSpec::input("n_ints", TypeDescriptor::int32()))
        .with_return(TypeDescriptor::int32());
    let callable = build(&info).unwrap();

    assert_eq!(callable.parameters(), vec!["ints"]);
    assert_eq!(callable.arity(), 2);
    assert_eq!(callable.result_count(), 1);
    assert!(matches!(
        callable.pre_steps(),
        [Step::LengthOf { .. }, Step::ToNative { .. }]
    ));
}

#[test]
fn test_listing() {
    let info = FunctionInfo::new("Test", "sum", "test_sum")
        .with_arg(ArgumentSpec::input("ints", int_array(1)))
        .with_arg(ArgumentSpec::input("n_ints", TypeDescriptor::int32()))
        .with_return(TypeDescriptor::int32());
    let callable = build(&info).unwrap();

    let expected = "def Test.sum(ints=_v1):\n    \
                    _v2 = len(_v1)\n    \
                    _v0 = to_native(_v1: array<gint32>)\n    \
                    _v4 = test_sum(_v0, _v2)\n    \
                    _v5 = to_managed(_v4: gint32)\n    \
                    return (_v5)";
    assert_eq!(callable.to_string(), expected);
}

#[test]
fn test_fallible_call_appends_error_slot() {
    let info = FunctionInfo::new("Test", "open", "test_open")
        .with_arg(ArgumentSpec::input("x", TypeDescriptor::int32()))
        .throws();
    let callable = build(&info).unwrap();

    assert_eq!(callable.parameters(), vec!["x"]);
    assert_eq!(callable.arity(), 2);
    assert_eq!(callable.result_count(), 0);
    assert!(matches!(callable.pre_steps(), [Step::ToNative { .. }, Step::AllocOut { .. }]));
    assert!(matches!(callable.post_steps().first(), Some(Step::CheckError { .. })));
    assert!(matches!(callable.cleanup_steps(), [Step::FreeSlot { .. }]));
}

#[test]
fn test_outbound_array_reads_after_its_length() {
    let info = FunctionInfo::new("Test", "get_ints", "test_get_ints")
        .with_arg(ArgumentSpec::output("ints", int_array(1)))
        .with_arg(ArgumentSpec::output("n_ints", TypeDescriptor::int32()));
    let callable = build(&info).unwrap();

    assert!(callable.parameters().is_empty());
    assert_eq!(callable.arity(), 2);
    assert_eq!(callable.result_count(), 1);
    assert!(matches!(
        callable.late_post_steps(),
        [Step::ToManaged { length: Some(_), .. }]
    ));
    assert!(callable
        .post_steps()
        .iter()
        .all(|step| matches!(step, Step::ReadSlot { .. })));
}

#[test]
fn test_return_array_with_out_length() {
    let info = FunctionInfo::new("Test", "get_return", "test_get_return")
        .with_arg(ArgumentSpec::output("length", TypeDescriptor::int32()))
        .with_return(int_array(0).with_ownership(Ownership::Everything));
    let callable = build(&info).unwrap();

    assert_eq!(callable.result_count(), 1);
    assert!(matches!(callable.late_post_steps(), [Step::ToManaged { length: Some(_), .. }]));
    assert!(callable
        .cleanup_steps()
        .iter()
        .any(|step| matches!(step, Step::Release { ownership: Ownership::Everything, .. })));
}

#[test]
fn test_inout_array_with_inout_length() {
    let info = FunctionInfo::new("Test", "grow", "test_grow")
        .with_arg(ArgumentSpec::inout("ints", int_array(1)))
        .with_arg(ArgumentSpec::inout("n_ints", TypeDescriptor::int32()));
    let callable = build(&info).unwrap();

    assert_eq!(callable.parameters(), vec!["ints"]);
    assert_eq!(callable.result_count(), 1);
    assert!(matches!(
        callable.pre_steps(),
        [
            Step::LengthOf { .. },
            Step::AllocOut { .. },
            Step::StoreSlot { .. },
            Step::ToNative { .. },
            Step::AllocOut { .. },
            Step::StoreSlot { .. },
        ]
    ));
}

#[test]
fn test_caller_chosen_count_stays_visible() {
    let info = FunctionInfo::new("Test", "fill", "test_fill")
        .with_arg(ArgumentSpec::input("n", TypeDescriptor::int32()))
        .with_arg(ArgumentSpec::output("ints", int_array(0)));
    let callable = build(&info).unwrap();
    assert_eq!(callable.parameters(), vec!["n"]);
    assert_eq!(callable.result_count(), 1);
}

#[test]
fn test_method_receiver_comes_first() {
    let info = FunctionInfo::new("Test", "set_size", "test_widget_set_size")
        .method_of(widget())
        .with_arg(ArgumentSpec::input("size", TypeDescriptor::int32()));
    let callable = build(&info).unwrap();
    assert_eq!(callable.parameters(), vec!["self", "size"]);
    assert_eq!(callable.arity(), 2);
    assert!(callable.invocation().to_string().starts_with("test_widget_set_size(_v0"));
}

#[test]
fn test_constructor_ref_sink_follows_configuration() {
    let object = Arc::new(RegisteredType::object("GObject", "Object"));
    let unowned = Arc::new(RegisteredType::object("GObject", "InitiallyUnowned").with_parent(object.clone()));
    let floating = Arc::new(RegisteredType::object("Test", "Floating").with_parent(unowned));

    let info = FunctionInfo::new("Test", "new", "test_floating_new")
        .with_return(TypeDescriptor::object(floating.clone()))
        .constructor();
    let callable = build(&info).unwrap();
    assert!(callable
        .post_steps()
        .iter()
        .any(|step| matches!(step, Step::RefSink { symbol, .. } if symbol == "g_object_ref_sink")));

    let plain = FunctionInfo::new("Test", "new", "test_obj_new")
        .with_return(TypeDescriptor::object(object))
        .constructor();
    let callable = build(&plain).unwrap();
    assert!(!callable
        .post_steps()
        .iter()
        .any(|step| matches!(step, Step::RefSink { .. })));

    let binding = BindingConfig {
        unowned_base: "Test.Floating".to_string(),
        ref_sink_symbol: "test_sink".to_string(),
    };
    let callable = SignatureBuilder::new(&info, &binding).build().unwrap();
    assert!(callable
        .post_steps()
        .iter()
        .any(|step| matches!(step, Step::RefSink { symbol, .. } if symbol == "test_sink")));
}

#[test]
fn test_owned_callback_outlives_the_call() {
    let info = Arc::new(CallbackInfo::new("Test", "Notify", vec![], TypeDescriptor::void()));
    let scoped = FunctionInfo::new("Test", "each", "test_each")
        .with_arg(ArgumentSpec::input("func", TypeDescriptor::callback(info.clone())));
    let callable = build(&scoped).unwrap();
    assert!(matches!(callable.cleanup_steps(), [Step::Untrack { .. }]));

    let kept = FunctionInfo::new("Test", "watch", "test_watch").with_arg(ArgumentSpec::input(
        "func",
        TypeDescriptor::callback(info).with_ownership(Ownership::Everything),
    ));
    let callable = build(&kept).unwrap();
    assert!(callable.cleanup_steps().is_empty());
}

#[test]
fn test_retained_callback_holds_user_data() {
    let info = Arc::new(CallbackInfo::new("Test", "Notify", vec![], TypeDescriptor::void()));
    let signature = |ownership| {
        FunctionInfo::new("Test", "watch", "test_watch")
            .with_arg(ArgumentSpec::input(
                "func",
                TypeDescriptor::callback(info.clone()).with_ownership(ownership),
            ))
            .with_arg(ArgumentSpec::input("user_data", TypeDescriptor::pointer()))
    };

    let kept = build(&signature(Ownership::Everything)).unwrap();
    assert!(matches!(
        kept.pre_steps(),
        [Step::Callback { .. }, Step::Opaque { .. }, Step::Retain { values, .. }] if values.len() == 1
    ));

    let scoped = build(&signature(Ownership::None)).unwrap();
    assert!(!scoped
        .pre_steps()
        .iter()
        .any(|step| matches!(step, Step::Retain { .. })));
}

#[test]
fn test_rejected_signatures() {
    let cases = vec![
        FunctionInfo::new("Test", "a", "a").with_arg(ArgumentSpec::inout(
            "list",
            TypeDescriptor::glist_of(TypeDescriptor::int32()),
        )),
        FunctionInfo::new("Test", "b", "b").with_arg(ArgumentSpec::output(
            "ints",
            TypeDescriptor::array_of(TypeDescriptor::int32()),
        )),
        FunctionInfo::new("Test", "c", "c").with_arg(ArgumentSpec::inout("obj", widget())),
    ];
    for info in &cases {
        let err = build(info).unwrap_err();
        assert!(matches!(err, MarshalError::NotImplemented { .. }), "{}: {}", info, err);
        assert!(err.is_generation_error());
    }

    let callback = Arc::new(CallbackInfo::new("Test", "Func", vec![], TypeDescriptor::void()));
    let cases = vec![
        FunctionInfo::new("Test", "d", "d").with_arg(ArgumentSpec::inout("func", TypeDescriptor::callback(callback))),
        FunctionInfo::new("Test", "e", "e").with_arg(ArgumentSpec::input(
            "rect",
            TypeDescriptor::structure(Arc::new(RegisteredType::structure("Test", "Rect", 16))).caller_allocated(),
        )),
        FunctionInfo::new("Test", "f", "f")
            .with_arg(ArgumentSpec::input("ints", int_array(1)))
            .with_arg(ArgumentSpec::output("n", TypeDescriptor::int32())),
        FunctionInfo::new("Test", "g", "g").with_arg(ArgumentSpec::input(
            "names",
            TypeDescriptor::strv().with_element(TypeDescriptor::int32()),
        )),
        FunctionInfo::new("Test", "h", "h").method_of(TypeDescriptor::int32()),
    ];
    for info in &cases {
        let err = build(info).unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedType { .. }), "{}: {}", info, err);
    }
}

#[test]
fn test_unsupported_error_names_the_argument() {
    let info = FunctionInfo::new("Test", "e", "e").with_arg(ArgumentSpec::input(
        "rect",
        TypeDescriptor::structure(Arc::new(RegisteredType::structure("Test", "Rect", 16))).caller_allocated(),
    ));
    match build(&info).unwrap_err() {
        MarshalError::UnsupportedType { name, tag, .. } => {
            assert_eq!(name, "rect");
            assert_eq!(tag, "Test.Rect");
        }
        other => panic!("unexpected error: {}", other),
    }
}
