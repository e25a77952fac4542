//! The declare-then-finish emission protocol

mod common;

use std::sync::Arc;

use common::{default_ctor, public_class, public_interface, world, world_with};
use ferrule_classfile::{
    ClassData, ConstantValue, FieldData, InnerClassRel, MethodData, Modifiers,
};
use ferrule_engine::host::{HostValue, Instr};
use ferrule_engine::loader::LoaderOptions;
use ferrule_engine::{BridgeError, CodeEmitter, MethodDescriptor};

#[test]
fn test_finish_generates_members_and_completes_host_type() {
    let w = world();
    let mut point = public_class("demo/Point", "java/lang/Object");
    point.fields.push(FieldData::new("x", "I", Modifiers::PRIVATE));
    point.methods.push(default_ctor());
    point
        .methods
        .push(MethodData::new("getX", "()I", Modifiers::PUBLIC));
    w.provider.add(point);

    let point = w.loader.load_class("demo/Point").unwrap();
    let host = point.host_type().unwrap();
    assert!(!point.is_host_type_finished());
    w.bodies.add(
        "demo/Point",
        "getX",
        "()I",
        CodeEmitter::instr(Instr::LoadArg(0))
            .then(CodeEmitter::get_field(host, 0))
            .then(CodeEmitter::instr(Instr::ReturnValue)),
    );

    point.finish().unwrap();
    assert!(point.is_host_type_finished());
    let registered = w.loader.wrapper_for_host_type(host).unwrap();
    assert!(std::sync::Arc::ptr_eq(&registered, &point));
    // a second finish is a no-op
    point.finish().unwrap();

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = point.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();

    let x = point.get_field_wrapper("x").unwrap().unwrap();
    x.set_value(Some(obj.clone()), HostValue::Int(12)).unwrap();
    assert_eq!(x.get_value(Some(obj.clone())).unwrap(), HostValue::Int(12));

    let get_x_md = MethodDescriptor::new(&w.loader, "getX", "()I");
    let get_x = point.get_method_wrapper(&get_x_md, false).unwrap().unwrap();
    assert_eq!(get_x.invoke(Some(obj), &[], false).unwrap(), HostValue::Int(12));
}

#[test]
fn test_static_final_constant_is_inlined_and_stores_are_discarded() {
    let w = world();
    let mut limits = public_class("demo/Limits", "java/lang/Object");
    limits.fields.push(
        FieldData::new(
            "MAX",
            "I",
            Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::FINAL,
        )
        .with_constant(ConstantValue::Int(100)),
    );
    w.provider.add(limits);

    let limits = w.loader.load_class("demo/Limits").unwrap();
    limits.finish().unwrap();
    assert!(w
        .engine
        .field_is_literal(limits.host_type().unwrap(), "MAX"));

    let max = limits.get_field_wrapper("MAX").unwrap().unwrap();
    assert_eq!(max.get_value(None).unwrap(), HostValue::Int(100));
    // assignment to an inlined constant has no effect
    max.set_value(None, HostValue::Int(5)).unwrap();
    assert_eq!(max.get_value(None).unwrap(), HostValue::Int(100));
}

#[test]
fn test_blank_final_field_reads_through_accessor_only() {
    let w = world();
    let mut entity = public_class("demo/Entity", "java/lang/Object");
    entity
        .fields
        .push(FieldData::new("id", "I", Modifiers::PUBLIC | Modifiers::FINAL));
    entity.methods.push(default_ctor());
    w.provider.add(entity);

    let entity = w.loader.load_class("demo/Entity").unwrap();
    entity.finish().unwrap();

    // the declaring class keeps the raw store for its own initialization
    let own = entity.get_field_wrapper("id").unwrap().unwrap();
    assert!(own.emit_set().is_some());

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = entity.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();
    own.set_value(Some(obj.clone()), HostValue::Int(7)).unwrap();

    // an outside unit resolves the read-only accessor and finds no store
    let outside = w.loader.reflect_host_type(entity.host_type().unwrap());
    let seen = outside.get_field_wrapper("id").unwrap().unwrap();
    assert_eq!(seen.get_value(Some(obj.clone())).unwrap(), HostValue::Int(7));
    assert!(seen.emit_set().is_none());
    assert!(matches!(
        seen.set_value(Some(obj), HostValue::Int(9)),
        Err(BridgeError::IllegalAccess(_))
    ));
}

#[test]
fn test_static_initializer_chains_to_base() {
    let w = world();
    let mut base = public_class("demo/Counted", "java/lang/Object");
    base.fields.push(FieldData::new(
        "COUNTER",
        "I",
        Modifiers::PUBLIC | Modifiers::STATIC,
    ));
    base.methods
        .push(MethodData::new("<clinit>", "()V", Modifiers::STATIC));
    w.provider.add(base);
    let mut sub = public_class("demo/Tally", "demo/Counted");
    sub.methods.push(default_ctor());
    w.provider.add(sub);

    let base = w.loader.load_class("demo/Counted").unwrap();
    let base_host = base.host_type().unwrap();
    w.bodies.add(
        "demo/Counted",
        "<clinit>",
        "()V",
        CodeEmitter::load_const(HostValue::Int(7))
            .then(CodeEmitter::put_static(base_host, 0))
            .then(CodeEmitter::instr(Instr::Return)),
    );

    let sub = w.loader.load_class("demo/Tally").unwrap();
    sub.finish().unwrap();
    // initialization is lazy: finishing alone must not run initializers
    assert_eq!(w.engine.get_static(base_host, 0), HostValue::Null);

    // the subclass declares no initializer; instantiating it must still
    // force the base initializer through the synthesized chain
    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = sub.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    ctor.invoke(None, &[], false).unwrap();
    assert_eq!(w.engine.get_static(base_host, 0), HostValue::Int(7));
}

#[test]
fn test_concrete_type_restubs_inherited_abstract_methods() {
    let w = world();
    let mut shape = ClassData::new(
        "demo/Shape",
        Modifiers::PUBLIC | Modifiers::ABSTRACT,
        Some("java/lang/Object".to_string()),
    );
    shape.methods.push(MethodData::new(
        "area",
        "()I",
        Modifiers::PUBLIC | Modifiers::ABSTRACT,
    ));
    shape.methods.push(default_ctor());
    w.provider.add(shape);
    let mut circle = public_class("demo/Circle", "demo/Shape");
    circle.methods.push(default_ctor());
    w.provider.add(circle);

    let circle = w.loader.load_class("demo/Circle").unwrap();
    circle.finish().unwrap();

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = circle.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();

    // the inherited abstract slot is callable on the host and must throw
    let area_md = MethodDescriptor::new(&w.loader, "area", "()I");
    let area = circle.get_method_wrapper(&area_md, true).unwrap().unwrap();
    let err = area.invoke(Some(obj), &[], false).unwrap_err();
    assert!(matches!(
        err.invocation_cause(),
        Some(BridgeError::AbstractMethodMissing(_))
    ));
}

#[test]
fn test_overriding_final_method_fails_at_construction() {
    let w = world();
    let mut base = public_class("demo/Sealed", "java/lang/Object");
    base.methods.push(MethodData::new(
        "seal",
        "()V",
        Modifiers::PUBLIC | Modifiers::FINAL,
    ));
    w.provider.add(base);
    let mut bad = public_class("demo/Bad", "demo/Sealed");
    bad.methods
        .push(MethodData::new("seal", "()V", Modifiers::PUBLIC));
    w.provider.add(bad);

    assert!(matches!(
        w.loader.load_class("demo/Bad"),
        Err(BridgeError::VerificationFailure(_))
    ));
}

#[test]
fn test_aot_nesting_links_enclosing_and_inner_wrappers() {
    let w = world_with(LoaderOptions {
        no_native_stubs: false,
        aot_nesting: true,
    });
    let rel = InnerClassRel {
        inner: "demo/Outer$In".to_string(),
        outer: "demo/Outer".to_string(),
        access: Modifiers::PUBLIC,
    };
    let mut outer = public_class("demo/Outer", "java/lang/Object");
    outer.inner_classes.push(rel.clone());
    w.provider.add(outer);
    let mut inner = public_class("demo/Outer$In", "java/lang/Object");
    inner.inner_classes.push(rel);
    w.provider.add(inner);

    let inner = w.loader.load_class("demo/Outer$In").unwrap();
    inner.finish().unwrap();
    let outer = w.loader.load_class("demo/Outer").unwrap();
    // the enclosing type finishes before the nested one
    assert!(outer.is_host_type_finished());

    let declaring = inner.declaring_type().unwrap();
    assert!(Arc::ptr_eq(&declaring, &outer));
    let inners = outer.inner_classes();
    assert_eq!(inners.len(), 1);
    assert!(Arc::ptr_eq(&inners[0], &inner));
    // the host records the lexical nesting
    let enclosed = w.engine.types_enclosed_by(outer.host_type().unwrap());
    assert_eq!(enclosed, vec![inner.host_type().unwrap()]);
}

#[test]
fn test_hierarchy_validation_failures_are_typed() {
    let w = world();
    w.provider.add(public_interface("demo/Marker"));
    w.provider
        .add(public_class("demo/ExtendsIface", "demo/Marker"));
    assert!(matches!(
        w.loader.load_class("demo/ExtendsIface"),
        Err(BridgeError::IncompatibleHierarchy(_))
    ));

    let mut sealed = public_class("demo/Closed", "java/lang/Object");
    sealed.modifiers |= Modifiers::FINAL;
    w.provider.add(sealed);
    w.provider.add(public_class("demo/SubClosed", "demo/Closed"));
    assert!(matches!(
        w.loader.load_class("demo/SubClosed"),
        Err(BridgeError::VerificationFailure(_))
    ));

    let mut impls = public_class("demo/ImplClass", "java/lang/Object");
    impls.interfaces.push("demo/Closed".to_string());
    w.provider.add(impls);
    assert!(matches!(
        w.loader.load_class("demo/ImplClass"),
        Err(BridgeError::IncompatibleHierarchy(_))
    ));

    w.provider.add(public_class("demo/Orphan", "missing/Parent"));
    assert!(matches!(
        w.loader.load_class("demo/Orphan"),
        Err(BridgeError::ClassNotResolvable(_))
    ));
}
