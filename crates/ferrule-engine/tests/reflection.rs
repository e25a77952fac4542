//! Reflective invocation and the member-handle registry

mod common;

use common::{default_ctor, public_class, world};
use ferrule_classfile::{MethodData, Modifiers};
use ferrule_engine::host::{HostValue, Instr, ThrowKind};
use ferrule_engine::{BridgeError, CodeEmitter, MethodDescriptor};

#[test]
fn test_argument_shapes_are_validated() {
    let w = world();
    let mut c = public_class("demo/Math", "java/lang/Object");
    c.methods.push(MethodData::new(
        "echo",
        "(I)I",
        Modifiers::PUBLIC | Modifiers::STATIC,
    ));
    w.provider.add(c);
    w.bodies.add(
        "demo/Math",
        "echo",
        "(I)I",
        CodeEmitter::instr(Instr::LoadArg(0)).then(CodeEmitter::instr(Instr::ReturnValue)),
    );

    let math = w.loader.load_class("demo/Math").unwrap();
    math.finish().unwrap();
    let echo_md = MethodDescriptor::new(&w.loader, "echo", "(I)I");
    let echo = math.get_method_wrapper(&echo_md, false).unwrap().unwrap();

    assert_eq!(
        echo.invoke(None, &[HostValue::Int(7)], false).unwrap(),
        HostValue::Int(7)
    );
    assert!(matches!(
        echo.invoke(None, &[], false),
        Err(BridgeError::ArgumentShapeMismatch(_))
    ));
    assert!(matches!(
        echo.invoke(None, &[HostValue::str("seven")], false),
        Err(BridgeError::ArgumentShapeMismatch(_))
    ));
}

#[test]
fn test_invocation_failures_wrap_the_cause() {
    let w = world();
    let mut c = public_class("demo/Boom", "java/lang/Object");
    c.methods.push(MethodData::new(
        "explode",
        "()V",
        Modifiers::PUBLIC | Modifiers::STATIC,
    ));
    w.provider.add(c);
    w.bodies.add(
        "demo/Boom",
        "explode",
        "()V",
        CodeEmitter::throw(ThrowKind::IllegalAccess, "demo/Boom.explode"),
    );

    let boom = w.loader.load_class("demo/Boom").unwrap();
    boom.finish().unwrap();
    let md = MethodDescriptor::new(&w.loader, "explode", "()V");
    let explode = boom.get_method_wrapper(&md, false).unwrap().unwrap();

    let err = explode.invoke(None, &[], false).unwrap_err();
    assert!(matches!(err, BridgeError::InvocationFailure(_)));
    assert!(matches!(
        err.invocation_cause(),
        Some(BridgeError::IllegalAccess(_))
    ));
}

#[test]
fn test_receiver_rules() {
    let w = world();
    let mut c = public_class("demo/Thing", "java/lang/Object");
    c.methods.push(default_ctor());
    c.methods
        .push(MethodData::new("poke", "()V", Modifiers::PUBLIC));
    w.provider.add(c);

    let thing = w.loader.load_class("demo/Thing").unwrap();
    thing.finish().unwrap();
    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = thing.get_method_wrapper(&ctor_md, false).unwrap().unwrap();

    // constructor invocation allocates; a receiver is a caller bug
    let obj = ctor.invoke(None, &[], false).unwrap();
    assert!(matches!(obj, HostValue::Object(_)));
    assert!(matches!(
        ctor.invoke(Some(obj.clone()), &[], false),
        Err(BridgeError::IllegalState(_))
    ));

    // instance invocation without a receiver fails fast
    let poke_md = MethodDescriptor::new(&w.loader, "poke", "()V");
    let poke = thing.get_method_wrapper(&poke_md, false).unwrap().unwrap();
    assert!(matches!(
        poke.invoke(None, &[], false),
        Err(BridgeError::NullReference)
    ));
    poke.invoke(Some(obj), &[], false).unwrap();
}

#[test]
fn test_member_handles_round_trip() {
    let w = world();
    let mut c = public_class("demo/Handled", "java/lang/Object");
    c.fields
        .push(ferrule_classfile::FieldData::new("n", "I", Modifiers::PUBLIC));
    c.methods.push(default_ctor());
    w.provider.add(c);

    let handled = w.loader.load_class("demo/Handled").unwrap();
    handled.finish().unwrap();
    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = handled.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let n = handled.get_field_wrapper("n").unwrap().unwrap();

    let mh = w.loader.pin_method(ctor.clone());
    let fh = w.loader.pin_field(n.clone());
    assert_ne!(mh, fh);

    let ctor_back = w.loader.method_from_handle(mh).unwrap();
    assert!(std::sync::Arc::ptr_eq(&ctor_back, &ctor));
    let n_back = w.loader.field_from_handle(fh).unwrap();
    assert!(std::sync::Arc::ptr_eq(&n_back, &n));
    // a handle answers only for its member kind
    assert!(w.loader.field_from_handle(mh).is_none());
    assert!(w.loader.method_from_handle(fh).is_none());
}

#[test]
fn test_array_clone_through_the_synthetic_method() {
    let w = world();
    let ints = w.loader.load_class("[I").unwrap();
    ints.finish().unwrap();

    let clone_md = MethodDescriptor::new(&w.loader, "clone", "()Ljava/lang/Object;");
    let clone = ints.get_method_wrapper(&clone_md, false).unwrap().unwrap();

    let arr = w.engine.allocate_array(
        ints.host_type().unwrap(),
        vec![HostValue::Int(1), HostValue::Int(2)],
    );
    let copy = clone
        .invoke(Some(HostValue::Object(arr)), &[], false)
        .unwrap();
    assert!(matches!(copy, HostValue::Object(r) if r != arr));
}

#[test]
fn test_method_wrapper_reports_declared_shape() {
    let w = world();
    let mut c = public_class("demo/Shaped", "java/lang/Object");
    c.methods.push(MethodData::new(
        "mix",
        "(IJ)Ljava/lang/Object;",
        Modifiers::PUBLIC | Modifiers::STATIC,
    ));
    w.provider.add(c);

    let shaped = w.loader.load_class("demo/Shaped").unwrap();
    shaped.finish().unwrap();
    let md = MethodDescriptor::new(&w.loader, "mix", "(IJ)Ljava/lang/Object;");
    let mix = shaped.get_method_wrapper(&md, false).unwrap().unwrap();

    assert!(mix.is_static());
    assert!(mix.is_public());
    let params = mix.parameters().unwrap();
    assert_eq!(params.len(), 2);
    assert!(params[0].is_primitive());
    let ret = mix.return_type().unwrap();
    assert!(std::sync::Arc::ptr_eq(&ret, &w.loader.root_wrapper()));
}
