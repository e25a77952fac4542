//! Concurrent finish convergence

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{default_ctor, public_class};
use ferrule_classfile::MethodData;
use ferrule_engine::host::{HostEngine, Instr, MethodBody};
use ferrule_engine::loader::{BodyCompiler, LoaderContext, LoaderOptions, MapClassProvider};
use ferrule_engine::{BridgeResult, TypeWrapper};

/// Counts how many bodies it is asked to emit.
struct CountingCompiler {
    calls: AtomicUsize,
}

impl BodyCompiler for CountingCompiler {
    fn compile(
        &self,
        _wrapper: &Arc<TypeWrapper>,
        _method: &MethodData,
        body: &mut MethodBody,
        _loader: &Arc<LoaderContext>,
    ) -> BridgeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        body.push(Instr::Return);
        Ok(())
    }
}

#[test]
fn test_concurrent_finish_converges_on_one_emission() {
    let engine = HostEngine::new();
    let provider = Arc::new(MapClassProvider::new());
    let compiler = Arc::new(CountingCompiler {
        calls: AtomicUsize::new(0),
    });
    let loader = LoaderContext::new(
        engine.clone(),
        Box::new(provider.clone()),
        Box::new(compiler.clone()),
        LoaderOptions::default(),
    );

    let mut c = public_class("demo/Conc", "java/lang/Object");
    c.methods.push(default_ctor());
    c.methods.push(MethodData::new(
        "work",
        "()V",
        ferrule_classfile::Modifiers::PUBLIC,
    ));
    provider.add(c);

    let wrapper = loader.load_class("demo/Conc").unwrap();
    let types_before = engine.type_count();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let wrapper = wrapper.clone();
                s.spawn(move || wrapper.finish())
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
    });

    // every caller converged on one emission: each body was compiled
    // exactly once and no additional host types appeared
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.type_count(), types_before);
    assert!(wrapper.is_host_type_finished());
}

#[test]
fn test_finish_twice_from_one_thread_is_idempotent() {
    let engine = HostEngine::new();
    let provider = Arc::new(MapClassProvider::new());
    let compiler = Arc::new(CountingCompiler {
        calls: AtomicUsize::new(0),
    });
    let loader = LoaderContext::new(
        engine,
        Box::new(provider.clone()),
        Box::new(compiler.clone()),
        LoaderOptions::default(),
    );
    let mut c = public_class("demo/Twice", "java/lang/Object");
    c.methods.push(default_ctor());
    provider.add(c);

    let wrapper = loader.load_class("demo/Twice").unwrap();
    wrapper.finish().unwrap();
    wrapper.finish().unwrap();
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}
