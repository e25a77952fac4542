//! Ferrule runtime bridge engine
//!
//! Ferrule hosts a foreign, JVM-style object model on a host execution
//! engine. This crate is the type-mapping and code-generation core:
//! - **Type wrappers** (`wrapper` module): the polymorphic runtime
//!   representation of foreign classes, with subtype/assignability
//!   queries and member lookup
//! - **Dynamic type emission** (`wrapper::dynamic`): the declare-then-
//!   finish engine that turns parsed foreign class data into executable
//!   host types, synthesizing override, interface-conformance, and
//!   native-binding glue along the way
//! - **Code emission** (`emit` module): composable deferred emission
//!   units wiring member access strategies into method bodies
//! - **Host engine** (`host` module): the class-and-vtable execution
//!   engine the bridge emits into
//! - **Loader context** (`loader` module): canonical wrapper interning,
//!   signature resolution, and the collaborator seams
//!
//! # Example
//!
//! ```rust,ignore
//! use ferrule_engine::host::HostEngine;
//! use ferrule_engine::loader::{DefaultBodyCompiler, LoaderContext, LoaderOptions, MapClassProvider};
//!
//! let engine = HostEngine::new();
//! let provider = MapClassProvider::new();
//! // ... provider.add(parsed_class) ...
//! let loader = LoaderContext::new(
//!     engine,
//!     Box::new(provider),
//!     Box::new(DefaultBodyCompiler),
//!     LoaderOptions::default(),
//! );
//! let wrapper = loader.load_class("demo/Point")?;
//! wrapper.finish()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Member descriptors: canonical, hashable member identity
pub mod descriptor;

/// Composable deferred code emission
pub mod emit;

/// Bridge error taxonomy
pub mod error;

/// The host execution engine model
pub mod host;

/// Loader context: interning, resolution, collaborator seams
pub mod loader;

/// Method and field wrappers
pub mod member;

/// The type wrapper hierarchy and the dynamic emission engine
pub mod wrapper;

pub use descriptor::MethodDescriptor;
pub use emit::CodeEmitter;
pub use error::{BridgeError, BridgeResult};
pub use host::{HostEngine, HostValue};
pub use loader::{
    BodyCompiler, ClassProvider, DefaultBodyCompiler, LoaderContext, LoaderOptions,
    MapClassProvider, MemberHandle, NativeSupportClass, TableBodyCompiler, ROOT_CLASS,
};
pub use member::{FieldWrapper, MethodWrapper};
pub use wrapper::{
    CtorRemap, CtorRemapKind, FieldRemap, MethodRemap, MethodRemapKind, Redirect, RemapSpec,
    TypeWrapper,
};
