//! Remapped types: declarative rules over a pre-existing host type

mod common;

use std::sync::Arc;

use common::{default_ctor, public_class, world, TestWorld};
use ferrule_classfile::{MethodData, Modifiers};
use ferrule_engine::host::{
    FnSig, FunctionBody, HostFunctionId, HostTypeBuilder, HostTypeId, HostValue, Instr,
    MethodAttribs, MethodBody, PrimitiveKind, TypeAttribs,
};
use ferrule_engine::{
    CodeEmitter, CtorRemap, CtorRemapKind, MethodDescriptor, MethodRemap, MethodRemapKind,
    Redirect, RemapSpec,
};

struct Backing {
    ty: HostTypeId,
    describe_fn: HostFunctionId,
}

fn emitted(code: Vec<Instr>) -> FunctionBody {
    FunctionBody::Emitted(Arc::new(MethodBody { code }))
}

/// A host type `sys.Text` with its own behavior, remapped onto the
/// foreign name `demo/Text` with one rule of each kind.
fn install_text_remap(w: &TestWorld) -> Backing {
    let engine = &w.engine;
    let int = engine.primitive_type(PrimitiveKind::Int);
    let unit = engine.new_unit();
    let b = HostTypeBuilder::declare(
        engine,
        "sys.Text".to_string(),
        TypeAttribs::PUBLIC,
        unit,
        Some(engine.object_type()),
        Vec::new(),
        None,
        None,
    );
    let (ctor, _) = b.define_method(
        "<init>".to_string(),
        FnSig {
            params: Vec::new(),
            ret: None,
            is_static: false,
        },
        MethodAttribs::PUBLIC,
        None,
        None,
        None,
    );
    engine.set_function_body(ctor, emitted(vec![Instr::Return]));
    let (length, _) = b.define_method(
        "length".to_string(),
        FnSig {
            params: Vec::new(),
            ret: Some(int),
            is_static: false,
        },
        MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
        None,
        None,
        None,
    );
    engine.set_function_body(
        length,
        emitted(vec![Instr::LoadConst(HostValue::Int(4)), Instr::ReturnValue]),
    );
    let (size, _) = b.define_method(
        "size".to_string(),
        FnSig {
            params: Vec::new(),
            ret: Some(int),
            is_static: false,
        },
        MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
        None,
        None,
        None,
    );
    engine.set_function_body(
        size,
        emitted(vec![Instr::LoadConst(HostValue::Int(11)), Instr::ReturnValue]),
    );
    let (describe, _) = b.define_method(
        "describe".to_string(),
        FnSig {
            params: Vec::new(),
            ret: Some(engine.object_type()),
            is_static: false,
        },
        MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
        None,
        None,
        None,
    );
    engine.set_function_body(
        describe,
        emitted(vec![
            Instr::LoadConst(HostValue::str("host")),
            Instr::ReturnValue,
        ]),
    );
    let ty = b.complete();

    w.loader.register_remap(RemapSpec {
        name: "demo/Text".to_string(),
        modifiers: Modifiers::PUBLIC,
        host_type: ty,
        base: None,
        interfaces: Vec::new(),
        methods: vec![
            MethodRemap {
                name: "length".to_string(),
                sig: "()I".to_string(),
                modifiers: Modifiers::PUBLIC,
                kind: MethodRemapKind::Passthrough,
            },
            MethodRemap {
                name: "count".to_string(),
                sig: "()I".to_string(),
                modifiers: Modifiers::PUBLIC,
                kind: MethodRemapKind::Redirect(Redirect {
                    name: Some("size".to_string()),
                    ..Redirect::default()
                }),
            },
            MethodRemap {
                name: "describe".to_string(),
                sig: "()Ljava/lang/String;".to_string(),
                modifiers: Modifiers::PUBLIC,
                kind: MethodRemapKind::Override {
                    host_name: "describe".to_string(),
                    special: Some(
                        CodeEmitter::pop()
                            .then(CodeEmitter::load_const(HostValue::str("bridged"))),
                    ),
                },
            },
            MethodRemap {
                name: "hash".to_string(),
                sig: "()I".to_string(),
                modifiers: Modifiers::PUBLIC,
                kind: MethodRemapKind::Virtual {
                    special: CodeEmitter::pop().then(CodeEmitter::load_const(HostValue::Int(9))),
                },
            },
        ],
        constructors: vec![CtorRemap {
            sig: "()V".to_string(),
            modifiers: Modifiers::PUBLIC,
            kind: CtorRemapKind::Passthrough,
        }],
        fields: Vec::new(),
    });
    Backing {
        ty,
        describe_fn: describe,
    }
}

fn construct(w: &TestWorld, wrapper: &Arc<ferrule_engine::TypeWrapper>) -> HostValue {
    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    wrapper
        .get_method_wrapper(&ctor_md, false)
        .unwrap()
        .unwrap()
        .invoke(None, &[], false)
        .unwrap()
}

#[test]
fn test_passthrough_redirect_and_virtual_fallback() {
    let w = world();
    install_text_remap(&w);
    let text = w.loader.load_class("demo/Text").unwrap();
    let obj = construct(&w, &text);

    // passthrough binds the existing host member in place
    let length_md = MethodDescriptor::new(&w.loader, "length", "()I");
    let length = text.get_method_wrapper(&length_md, false).unwrap().unwrap();
    assert_eq!(
        length.invoke(Some(obj.clone()), &[], false).unwrap(),
        HostValue::Int(4)
    );

    // redirect re-aims at the differently named member
    let count_md = MethodDescriptor::new(&w.loader, "count", "()I");
    let count = text.get_method_wrapper(&count_md, false).unwrap().unwrap();
    assert_eq!(
        count.invoke(Some(obj.clone()), &[], false).unwrap(),
        HostValue::Int(11)
    );

    // a virtual rule with no overriding receiver uses the fallback binding
    let hash_md = MethodDescriptor::new(&w.loader, "hash", "()I");
    let hash = text.get_method_wrapper(&hash_md, false).unwrap().unwrap();
    assert!(hash.is_remapped_virtual());
    assert_eq!(hash.invoke(Some(obj), &[], false).unwrap(), HostValue::Int(9));
}

#[test]
fn test_direct_instantiation_observes_the_override() {
    let w = world();
    let backing = install_text_remap(&w);
    let text = w.loader.load_class("demo/Text").unwrap();

    // the raw host type keeps its original behavior
    let raw = w.engine.allocate(backing.ty).unwrap();
    assert_eq!(
        w.engine
            .invoke_function(backing.describe_fn, vec![HostValue::Object(raw)])
            .unwrap(),
        HostValue::str("host")
    );

    // direct instantiation through the bridge dispatches the override
    let obj = construct(&w, &text);
    let describe_md = MethodDescriptor::new(&w.loader, "describe", "()Ljava/lang/String;");
    let describe = text
        .get_method_wrapper(&describe_md, false)
        .unwrap()
        .unwrap();
    assert!(describe.is_remapped_override());
    assert_eq!(
        describe.invoke(Some(obj), &[], false).unwrap(),
        HostValue::str("bridged")
    );
}

#[test]
fn test_dynamic_subtype_of_a_remapped_base() {
    let w = world();
    install_text_remap(&w);
    let mut sub = public_class("demo/SubText", "demo/Text");
    sub.methods.push(default_ctor());
    sub.methods
        .push(MethodData::new("hash", "()I", Modifiers::PUBLIC));
    w.provider.add(sub);
    w.bodies.add(
        "demo/SubText",
        "hash",
        "()I",
        CodeEmitter::load_const(HostValue::Int(42))
            .then(CodeEmitter::instr(Instr::ReturnValue)),
    );

    let sub = w.loader.load_class("demo/SubText").unwrap();
    sub.finish().unwrap();
    let text = w.loader.load_class("demo/Text").unwrap();
    let obj = construct(&w, &sub);

    // the subtype's declaration wins over the virtual fallback
    let hash_md = MethodDescriptor::new(&w.loader, "hash", "()I");
    let hash = text.get_method_wrapper(&hash_md, false).unwrap().unwrap();
    assert_eq!(
        hash.invoke(Some(obj.clone()), &[], false).unwrap(),
        HostValue::Int(42)
    );

    // the base override forwards on the subtype as well
    let describe_md = MethodDescriptor::new(&w.loader, "describe", "()Ljava/lang/String;");
    let describe = text
        .get_method_wrapper(&describe_md, false)
        .unwrap()
        .unwrap();
    assert_eq!(
        describe.invoke(Some(obj), &[], false).unwrap(),
        HostValue::str("bridged")
    );
}
