//! Shared fixtures for the bridge integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ferrule_classfile::{ClassData, MethodData, Modifiers};
use ferrule_engine::host::HostEngine;
use ferrule_engine::loader::{
    LoaderContext, LoaderOptions, MapClassProvider, TableBodyCompiler,
};

/// Engine, loader, and the mutable collaborator handles
pub struct TestWorld {
    pub engine: Arc<HostEngine>,
    pub provider: Arc<MapClassProvider>,
    pub bodies: Arc<TableBodyCompiler>,
    pub loader: Arc<LoaderContext>,
}

pub fn world() -> TestWorld {
    world_with(LoaderOptions::default())
}

pub fn world_with(options: LoaderOptions) -> TestWorld {
    let engine = HostEngine::new();
    let provider = Arc::new(MapClassProvider::new());
    let bodies = Arc::new(TableBodyCompiler::new());
    let loader = LoaderContext::new(
        engine.clone(),
        Box::new(provider.clone()),
        Box::new(bodies.clone()),
        options,
    );
    TestWorld {
        engine,
        provider,
        bodies,
        loader,
    }
}

pub fn public_class(name: &str, super_name: &str) -> ClassData {
    ClassData::new(name, Modifiers::PUBLIC, Some(super_name.to_string()))
}

pub fn public_interface(name: &str) -> ClassData {
    ClassData::new(
        name,
        Modifiers::PUBLIC | Modifiers::INTERFACE | Modifiers::ABSTRACT,
        Some("java/lang/Object".to_string()),
    )
}

pub fn default_ctor() -> MethodData {
    MethodData::new("<init>", "()V", Modifiers::PUBLIC)
}
