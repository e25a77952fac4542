//! Interface conformance stub synthesis

mod common;

use common::{default_ctor, public_class, public_interface, world};
use ferrule_classfile::{ClassData, MethodData, Modifiers};
use ferrule_engine::host::HostValue;
use ferrule_engine::{BridgeError, MethodDescriptor};

fn task_interface() -> ClassData {
    let mut task = public_interface("demo/Task");
    task.methods.push(MethodData::new(
        "run",
        "()V",
        Modifiers::PUBLIC | Modifiers::ABSTRACT,
    ));
    task
}

#[test]
fn test_missing_method_on_abstract_type_becomes_registered_placeholder() {
    let w = world();
    w.provider.add(task_interface());
    let mut c = ClassData::new(
        "demo/AbstractTask",
        Modifiers::PUBLIC | Modifiers::ABSTRACT,
        Some("java/lang/Object".to_string()),
    );
    c.interfaces.push("demo/Task".to_string());
    w.provider.add(c);

    let abstract_task = w.loader.load_class("demo/AbstractTask").unwrap();
    abstract_task.finish().unwrap();

    // the placeholder is a real, discoverable member of the type itself
    let run_md = MethodDescriptor::new(&w.loader, "run", "()V");
    let run = abstract_task
        .get_method_wrapper(&run_md, false)
        .unwrap()
        .unwrap();
    assert!(run.is_abstract());
    assert!(std::sync::Arc::ptr_eq(&run.declaring_type(), &abstract_task));
}

#[test]
fn test_missing_method_on_concrete_type_throws_abstract_method_error() {
    let w = world();
    w.provider.add(task_interface());
    let mut c = public_class("demo/Worker", "java/lang/Object");
    c.interfaces.push("demo/Task".to_string());
    c.methods.push(default_ctor());
    w.provider.add(c);

    let worker = w.loader.load_class("demo/Worker").unwrap();
    worker.finish().unwrap();

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = worker.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();

    let run_md = MethodDescriptor::new(&w.loader, "run", "()V");
    let run = worker.get_method_wrapper(&run_md, false).unwrap().unwrap();
    let err = run.invoke(Some(obj), &[], false).unwrap_err();
    assert!(matches!(
        err.invocation_cause(),
        Some(BridgeError::AbstractMethodMissing(_))
    ));
}

#[test]
fn test_non_public_provider_gets_illegal_access_stub() {
    let w = world();
    w.provider.add(task_interface());
    let mut c = public_class("demo/Shy", "java/lang/Object");
    c.interfaces.push("demo/Task".to_string());
    c.methods.push(default_ctor());
    // package-private method with the interface method's name and shape
    c.methods
        .push(MethodData::new("run", "()V", Modifiers::empty()));
    w.provider.add(c);

    let shy = w.loader.load_class("demo/Shy").unwrap();
    shy.finish().unwrap();

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = shy.get_method_wrapper(&ctor_md, false).unwrap().unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();

    // dispatching through the interface slot hits the throwing stub
    let task = w.loader.load_class("demo/Task").unwrap();
    let run_md = MethodDescriptor::new(&w.loader, "run", "()V");
    let iface_run = task.get_method_wrapper(&run_md, false).unwrap().unwrap();
    let slot = iface_run.dispatch_slot().unwrap();
    let target = w
        .engine
        .resolve_slot(shy.host_type().unwrap(), slot)
        .unwrap();
    let err = w
        .engine
        .invoke_function(target, vec![obj.clone()])
        .unwrap_err();
    assert!(matches!(err, BridgeError::IllegalAccess(_)));

    // the package-private method itself still runs
    let own = shy.get_method_wrapper(&run_md, false).unwrap().unwrap();
    own.invoke(Some(obj), &[], true).unwrap();
}

#[test]
fn test_subclass_override_of_placeholder_satisfies_the_interface() {
    let w = world();
    w.provider.add(task_interface());
    let mut a = ClassData::new(
        "demo/AbstractTask",
        Modifiers::PUBLIC | Modifiers::ABSTRACT,
        Some("java/lang/Object".to_string()),
    );
    a.interfaces.push("demo/Task".to_string());
    w.provider.add(a);
    let mut c = public_class("demo/ConcreteTask", "demo/AbstractTask");
    c.methods.push(default_ctor());
    c.methods
        .push(MethodData::new("run", "()V", Modifiers::PUBLIC));
    w.provider.add(c);

    let concrete = w.loader.load_class("demo/ConcreteTask").unwrap();
    concrete.finish().unwrap();

    let ctor_md = MethodDescriptor::new(&w.loader, "<init>", "()V");
    let ctor = concrete
        .get_method_wrapper(&ctor_md, false)
        .unwrap()
        .unwrap();
    let obj = ctor.invoke(None, &[], false).unwrap();

    // interface dispatch lands on the subclass's concrete method
    let task = w.loader.load_class("demo/Task").unwrap();
    let run_md = MethodDescriptor::new(&w.loader, "run", "()V");
    let slot = task
        .get_method_wrapper(&run_md, false)
        .unwrap()
        .unwrap()
        .dispatch_slot()
        .unwrap();
    let target = w
        .engine
        .resolve_slot(concrete.host_type().unwrap(), slot)
        .unwrap();
    assert_eq!(
        w.engine.invoke_function(target, vec![obj]).unwrap(),
        HostValue::Null
    );
}
