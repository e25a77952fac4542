//! Native method binding: table, support class, trampoline, stubless mode

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{public_class, world, world_with};
use ferrule_classfile::{MethodData, Modifiers};
use ferrule_engine::host::{HostValue, Instr, NativeFn, NativeInvoker};
use ferrule_engine::loader::{LoaderOptions, NativeSupportClass};
use ferrule_engine::{BridgeError, CodeEmitter, MethodDescriptor};

fn native_method(name: &str) -> MethodData {
    MethodData::new(
        name,
        "()I",
        Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::NATIVE,
    )
}

struct LateInvoker {
    resolves: AtomicUsize,
}

impl NativeInvoker for LateInvoker {
    fn resolve(&self, class: &str, name: &str, _sig: &str) -> Option<NativeFn> {
        if class == "demo/NativeOps" && name == "late" {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            let f: NativeFn = Arc::new(|_, _| Ok(HostValue::Int(3)));
            Some(f)
        } else {
            None
        }
    }
}

#[test]
fn test_native_binding_fallback_chain() {
    let w = world();
    let mut c = public_class("demo/NativeOps", "java/lang/Object");
    c.methods.push(native_method("table"));
    c.methods.push(native_method("support"));
    c.methods.push(native_method("late"));
    c.methods.push(native_method("ghost"));
    w.provider.add(c);

    w.loader.register_native_binding(
        "demo.NativeOps.table()I",
        CodeEmitter::load_const(HostValue::Int(1)).then(CodeEmitter::instr(Instr::ReturnValue)),
    );
    w.loader.register_native_support(
        "demo/NativeOps",
        NativeSupportClass::new()
            .with_method("table", |_, _| Ok(HostValue::Int(100)))
            .with_method("support", |_, _| Ok(HostValue::Int(2))),
    );
    let invoker = Arc::new(LateInvoker {
        resolves: AtomicUsize::new(0),
    });
    w.loader.set_native_invoker(invoker.clone());

    let ops = w.loader.load_class("demo/NativeOps").unwrap();
    ops.finish().unwrap();

    let call = |name: &str| {
        ops.get_method_wrapper(&MethodDescriptor::new(&w.loader, name, "()I"), false)
            .unwrap()
            .unwrap()
            .invoke(None, &[], false)
    };

    // a pre-built table binding wins over the support class
    assert_eq!(call("table").unwrap(), HostValue::Int(1));
    // the support class is consulted next
    assert_eq!(call("support").unwrap(), HostValue::Int(2));
    // unbound natives trampoline through the external invoker
    assert_eq!(call("late").unwrap(), HostValue::Int(3));
    // the resolved binding is cached per method
    assert_eq!(call("late").unwrap(), HostValue::Int(3));
    assert_eq!(invoker.resolves.load(Ordering::SeqCst), 1);
    // an unsatisfied link surfaces as a typed failure
    let err = call("ghost").unwrap_err();
    assert!(matches!(
        err.invocation_cause(),
        Some(BridgeError::NotImplemented(_))
    ));
}

#[test]
fn test_no_native_stubs_mode_throws() {
    let w = world_with(LoaderOptions {
        no_native_stubs: true,
        aot_nesting: false,
    });
    let mut c = public_class("demo/Stubless", "java/lang/Object");
    c.methods.push(native_method("missing"));
    w.provider.add(c);

    let s = w.loader.load_class("demo/Stubless").unwrap();
    s.finish().unwrap();

    let err = s
        .get_method_wrapper(&MethodDescriptor::new(&w.loader, "missing", "()I"), false)
        .unwrap()
        .unwrap()
        .invoke(None, &[], false)
        .unwrap_err();
    assert!(matches!(
        err.invocation_cause(),
        Some(BridgeError::NotImplemented(_))
    ));
}
