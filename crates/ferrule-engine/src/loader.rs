//! Loader context
//!
//! The explicit registry object that owns wrapper identity: canonical
//! interning of type wrappers, signature-to-wrapper resolution, the
//! bootstrap root and primitive wrappers, and the seams to the external
//! collaborators (class provider, body compiler, native binding sources).
//! Everything here is constructed deterministically before first use and
//! lives exactly as long as the context.

use std::sync::Arc;

use dashmap::DashMap;
use ferrule_classfile::{split_method_sig, ClassData, MethodData, Modifiers, SigElem};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::emit::CodeEmitter;
use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody};
use crate::host::engine::{HostEngine, NativeFn, NativeInvoker};
use crate::host::ty::HostTypeKind;
use crate::host::value::{HostTypeId, HostValue, PrimitiveKind, UnitId};
use crate::member::{FieldWrapper, MethodWrapper};
use crate::wrapper::{array, compiled, declared, dynamic, remapped, RemapSpec, TypeWrapper,
    VerifierKind, WrapperKind};

/// Foreign name of the universal root class.
pub const ROOT_CLASS: &str = "java/lang/Object";

/// Source of parsed foreign class data, keyed by slash-separated name.
pub trait ClassProvider: Send + Sync {
    /// The parsed class, if this source has it.
    fn load(&self, name: &str) -> Option<Arc<ClassData>>;
}

/// An in-memory class source.
#[derive(Default)]
pub struct MapClassProvider {
    classes: RwLock<FxHashMap<String, Arc<ClassData>>>,
}

impl MapClassProvider {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class.
    pub fn add(&self, class: ClassData) {
        self.classes
            .write()
            .insert(class.name.clone(), Arc::new(class));
    }
}

impl ClassProvider for MapClassProvider {
    fn load(&self, name: &str) -> Option<Arc<ClassData>> {
        self.classes.read().get(name).cloned()
    }
}

impl<T: ClassProvider> ClassProvider for Arc<T> {
    fn load(&self, name: &str) -> Option<Arc<ClassData>> {
        (**self).load(name)
    }
}

/// The external instruction compiler: emits a complete body for a
/// non-native, non-abstract foreign method.
pub trait BodyCompiler: Send + Sync {
    /// Emit the body of `method` into `body`.
    fn compile(
        &self,
        wrapper: &Arc<TypeWrapper>,
        method: &MethodData,
        body: &mut MethodBody,
        loader: &Arc<LoaderContext>,
    ) -> BridgeResult<()>;
}

impl<T: BodyCompiler> BodyCompiler for Arc<T> {
    fn compile(
        &self,
        wrapper: &Arc<TypeWrapper>,
        method: &MethodData,
        body: &mut MethodBody,
        loader: &Arc<LoaderContext>,
    ) -> BridgeResult<()> {
        (**self).compile(wrapper, method, body, loader)
    }
}

fn emit_default_return(sig: &str, body: &mut MethodBody) {
    let ret = ferrule_classfile::ret_sig_of(sig);
    match ret.as_bytes().first().copied() {
        Some(b'V') => body.push(Instr::Return),
        Some(code) => {
            let value = PrimitiveKind::from_sig_code(code)
                .map(HostValue::default_of)
                .unwrap_or(HostValue::Null);
            body.push(Instr::LoadConst(value));
            body.push(Instr::ReturnValue);
        }
        None => body.push(Instr::Return),
    }
}

/// Body compiler that emits a default-value return for every method.
#[derive(Default)]
pub struct DefaultBodyCompiler;

impl BodyCompiler for DefaultBodyCompiler {
    fn compile(
        &self,
        _wrapper: &Arc<TypeWrapper>,
        method: &MethodData,
        body: &mut MethodBody,
        _loader: &Arc<LoaderContext>,
    ) -> BridgeResult<()> {
        emit_default_return(&method.signature, body);
        Ok(())
    }
}

/// Body compiler backed by a table of complete bodies keyed by
/// `class.name(sig)` (dotted class name), falling back to default-value
/// returns.
#[derive(Default)]
pub struct TableBodyCompiler {
    bodies: RwLock<FxHashMap<String, CodeEmitter>>,
}

impl TableBodyCompiler {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a complete body (including its return) for a method.
    pub fn add(&self, class: &str, name: &str, sig: &str, emitter: CodeEmitter) {
        let key = format!("{}.{}{}", class.replace('/', "."), name, sig);
        self.bodies.write().insert(key, emitter);
    }
}

impl BodyCompiler for TableBodyCompiler {
    fn compile(
        &self,
        wrapper: &Arc<TypeWrapper>,
        method: &MethodData,
        body: &mut MethodBody,
        _loader: &Arc<LoaderContext>,
    ) -> BridgeResult<()> {
        let key = format!(
            "{}.{}{}",
            wrapper.name().replace('/', "."),
            method.name,
            method.signature
        );
        match self.bodies.read().get(&key) {
            Some(emitter) => emitter.emit(body),
            None => emit_default_return(&method.signature, body),
        }
        Ok(())
    }
}

/// A native-support class: native implementations keyed by method name,
/// discovered by foreign class name.
#[derive(Default)]
pub struct NativeSupportClass {
    methods: FxHashMap<String, NativeFn>,
}

impl NativeSupportClass {
    /// Empty support class.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a native implementation.
    pub fn with_method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&HostEngine, &[HostValue]) -> BridgeResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    /// The implementation for a method name.
    pub fn method(&self, name: &str) -> Option<NativeFn> {
        self.methods.get(name).cloned()
    }
}

/// Loader behavior switches
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Throw instead of generating trampolines for unbound natives
    pub no_native_stubs: bool,
    /// Emit lexically nested classes as nested host types
    pub aot_nesting: bool,
}

/// A pinned member reference held by the reflection facade
pub enum MemberRef {
    /// Method wrapper
    Method(Arc<MethodWrapper>),
    /// Field wrapper
    Field(Arc<FieldWrapper>),
}

/// Index into the loader's member-handle arena; replaces opaque pointer
/// cookies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberHandle(pub usize);

/// The loader context
pub struct LoaderContext {
    engine: Arc<HostEngine>,
    options: LoaderOptions,
    unit: UnitId,
    provider: Box<dyn ClassProvider>,
    compiler: Box<dyn BodyCompiler>,
    types: DashMap<String, Arc<TypeWrapper>>,
    host_index: DashMap<HostTypeId, Arc<TypeWrapper>>,
    /// Per-thread definition chains, for circularity detection; two
    /// threads defining the same class race benignly and the intern
    /// table picks the winner
    defining: Mutex<FxHashSet<(std::thread::ThreadId, String)>>,
    native_table: RwLock<FxHashMap<String, CodeEmitter>>,
    native_support: DashMap<String, Arc<NativeSupportClass>>,
    remaps: RwLock<FxHashMap<String, RemapSpec>>,
    primitives: OnceCell<Vec<Arc<TypeWrapper>>>,
    root: OnceCell<Arc<TypeWrapper>>,
    null_type: OnceCell<Arc<TypeWrapper>>,
    member_handles: RwLock<Vec<MemberRef>>,
}

impl LoaderContext {
    /// New context over an engine and its collaborators.
    pub fn new(
        engine: Arc<HostEngine>,
        provider: Box<dyn ClassProvider>,
        compiler: Box<dyn BodyCompiler>,
        options: LoaderOptions,
    ) -> Arc<LoaderContext> {
        let unit = engine.new_unit();
        let ctx = Arc::new(LoaderContext {
            engine,
            options,
            unit,
            provider,
            compiler,
            types: DashMap::new(),
            host_index: DashMap::new(),
            defining: Mutex::new(FxHashSet::default()),
            native_table: RwLock::new(FxHashMap::default()),
            native_support: DashMap::new(),
            remaps: RwLock::new(FxHashMap::default()),
            primitives: OnceCell::new(),
            root: OnceCell::new(),
            null_type: OnceCell::new(),
            member_handles: RwLock::new(Vec::new()),
        });
        ctx.bootstrap();
        ctx
    }

    fn bootstrap(self: &Arc<Self>) {
        let engine = &self.engine;
        let root = compiled::new_compiled_wrapper(self, ROOT_CLASS, engine.object_type(), None);
        self.types.insert(ROOT_CLASS.to_string(), root.clone());
        self.host_index.insert(engine.object_type(), root.clone());
        let _ = self.root.set(root);

        let primitives = PrimitiveKind::ALL
            .iter()
            .map(|kind| {
                TypeWrapper::new(
                    self,
                    kind.keyword(),
                    Modifiers::PUBLIC | Modifiers::ABSTRACT | Modifiers::FINAL,
                    None,
                    WrapperKind::Primitive {
                        kind: *kind,
                        host: engine.primitive_type(*kind),
                    },
                )
            })
            .collect();
        let _ = self.primitives.set(primitives);

        let null_type = TypeWrapper::new(
            self,
            "<null>",
            Modifiers::VERIFIER_MARKER,
            None,
            WrapperKind::Verifier(VerifierKind::Null),
        );
        let _ = self.null_type.set(null_type);
    }

    /// The host engine.
    pub fn engine(&self) -> &Arc<HostEngine> {
        &self.engine
    }

    /// Behavior switches.
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// This context's compilation unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The universal root wrapper.
    pub fn root_wrapper(&self) -> Arc<TypeWrapper> {
        self.root.get().expect("bootstrap ran").clone()
    }

    /// The designated null-type wrapper.
    pub fn null_type_wrapper(&self) -> Arc<TypeWrapper> {
        self.null_type.get().expect("bootstrap ran").clone()
    }

    /// The singleton wrapper of a primitive.
    pub fn primitive(&self, kind: PrimitiveKind) -> Arc<TypeWrapper> {
        let primitives = self.primitives.get().expect("bootstrap ran");
        let idx = PrimitiveKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(0);
        primitives[idx].clone()
    }

    /// Register a remapping rule set; consulted before the class
    /// provider on first load of the name.
    pub fn register_remap(&self, spec: RemapSpec) {
        self.remaps.write().insert(spec.name.clone(), spec);
    }

    /// Register a pre-built native body under
    /// `pkg.Class.name(sig)` (dotted class name).
    pub fn register_native_binding(&self, key: impl Into<String>, emitter: CodeEmitter) {
        self.native_table.write().insert(key.into(), emitter);
    }

    pub(crate) fn native_binding(&self, key: &str) -> Option<CodeEmitter> {
        self.native_table.read().get(key).cloned()
    }

    /// Register a native-support class under a foreign class name.
    pub fn register_native_support(
        &self,
        class_name: impl Into<String>,
        support: NativeSupportClass,
    ) {
        self.native_support
            .insert(class_name.into(), Arc::new(support));
    }

    pub(crate) fn native_support_for(&self, class_name: &str) -> Option<Arc<NativeSupportClass>> {
        self.native_support.get(class_name).map(|e| e.clone())
    }

    /// Install the external native-call mechanism.
    pub fn set_native_invoker(&self, invoker: Arc<dyn NativeInvoker>) {
        self.engine.set_native_invoker(invoker);
    }

    pub(crate) fn body_compiler(&self) -> &dyn BodyCompiler {
        self.compiler.as_ref()
    }

    fn intern(&self, name: &str, wrapper: Arc<TypeWrapper>) -> Arc<TypeWrapper> {
        use dashmap::mapref::entry::Entry;
        match self.types.entry(name.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                slot.insert(wrapper.clone());
                wrapper
            }
        }
    }

    /// Load a class by slash-separated foreign name. Unresolvable names
    /// are an error here; use [`LoaderContext::resolve_class`] where a
    /// structural placeholder is acceptable.
    pub fn load_class(self: &Arc<Self>, name: &str) -> BridgeResult<Arc<TypeWrapper>> {
        if let Some(existing) = self.types.get(name) {
            let wrapper = existing.clone();
            drop(existing);
            if wrapper.is_unloadable() {
                return Err(BridgeError::ClassNotResolvable(name.to_string()));
            }
            return Ok(wrapper);
        }
        if name.starts_with('[') {
            let wrapper = self.build_array_wrapper(name)?;
            return Ok(self.intern(name, wrapper));
        }
        let remap = self.remaps.read().get(name).cloned();
        if let Some(spec) = remap {
            let wrapper = remapped::new_remapped_wrapper(self, spec)?;
            let wrapper = self.intern(name, wrapper.clone());
            self.host_index
                .entry(wrapper.host_type()?)
                .or_insert_with(|| wrapper.clone());
            return Ok(wrapper);
        }
        if let Some(class) = self.provider.load(name) {
            let key = (std::thread::current().id(), name.to_string());
            {
                let mut defining = self.defining.lock();
                if !defining.insert(key.clone()) {
                    return Err(BridgeError::IncompatibleHierarchy(format!(
                        "circular definition of {name}"
                    )));
                }
            }
            let result = dynamic::define_class(self, class);
            self.defining.lock().remove(&key);
            return Ok(self.intern(name, result?));
        }
        Err(BridgeError::ClassNotResolvable(name.to_string()))
    }

    /// Resolve a class leniently: unresolvable names become interned
    /// unloadable placeholders so signatures referencing missing classes
    /// can still be represented structurally.
    pub fn resolve_class(self: &Arc<Self>, name: &str) -> BridgeResult<Arc<TypeWrapper>> {
        match self.load_class(name) {
            Ok(wrapper) => Ok(wrapper),
            Err(BridgeError::ClassNotResolvable(_)) => {
                let placeholder = TypeWrapper::new(
                    self,
                    name,
                    Modifiers::UNLOADABLE_MARKER,
                    None,
                    WrapperKind::Unloadable,
                );
                Ok(self.intern(name, placeholder))
            }
            Err(other) => Err(other),
        }
    }

    fn build_array_wrapper(self: &Arc<Self>, name: &str) -> BridgeResult<Arc<TypeWrapper>> {
        let elem_name = &name[1..];
        let elem = match elem_name.as_bytes().first() {
            Some(b'[') => self.load_class(elem_name)?,
            Some(b'L') if elem_name.ends_with(';') => {
                self.load_class(&elem_name[1..elem_name.len() - 1])?
            }
            Some(code) => match PrimitiveKind::from_sig_code(*code) {
                Some(kind) if kind != PrimitiveKind::Void && elem_name.len() == 1 => {
                    self.primitive(kind)
                }
                _ => {
                    return Err(BridgeError::ClassNotResolvable(format!(
                        "malformed array name {name}"
                    )))
                }
            },
            None => {
                return Err(BridgeError::ClassNotResolvable(format!(
                    "malformed array name {name}"
                )))
            }
        };
        let host = self.engine.array_type_of(elem.host_type_or_object());
        let wrapper = array::new_array_wrapper(self, name, host);
        self.host_index
            .entry(host)
            .or_insert_with(|| wrapper.clone());
        Ok(wrapper)
    }

    /// Define a dynamic class directly from parsed class data.
    pub fn define_class_data(
        self: &Arc<Self>,
        class: Arc<ClassData>,
    ) -> BridgeResult<Arc<TypeWrapper>> {
        let name = class.name.clone();
        if self.types.contains_key(&name) {
            return Err(BridgeError::IllegalState(format!(
                "class {name} is already defined"
            )));
        }
        let wrapper = dynamic::define_class(self, class)?;
        Ok(self.intern(&name, wrapper))
    }

    /// Expose an existing host type under a foreign class name.
    pub fn declare_external(
        self: &Arc<Self>,
        foreign_name: &str,
        modifiers: Modifiers,
        host: HostTypeId,
    ) -> Arc<TypeWrapper> {
        let base = self
            .engine
            .with_type(host, |t| t.base)
            .and_then(|b| self.wrapper_for_host_type(b))
            .or_else(|| Some(self.root_wrapper()));
        let wrapper = declared::new_declared_wrapper(self, foreign_name, modifiers, host, base);
        let wrapper = self.intern(foreign_name, wrapper);
        self.host_index.entry(host).or_insert_with(|| wrapper.clone());
        wrapper
    }

    /// A fresh host-compiled wrapper over a completed host type, seen the
    /// way an outside unit would see it (ahead-of-time reflection, not
    /// cached foreign class data).
    pub fn reflect_host_type(self: &Arc<Self>, host: HostTypeId) -> Arc<TypeWrapper> {
        let base = self
            .engine
            .with_type(host, |t| t.base)
            .and_then(|b| self.wrapper_for_host_type(b));
        let name = self.engine.type_name(host).replace('.', "/");
        compiled::new_compiled_wrapper(self, &name, host, base)
    }

    /// The wrapper registered for a host type, if any.
    pub fn wrapper_for_host_type(&self, host: HostTypeId) -> Option<Arc<TypeWrapper>> {
        self.host_index.get(&host).map(|e| e.clone())
    }

    pub(crate) fn register_host_wrapper(&self, host: HostTypeId, wrapper: Arc<TypeWrapper>) {
        self.host_index.insert(host, wrapper);
    }

    /// The wrapper for one signature element.
    pub fn wrapper_from_sig_elem(self: &Arc<Self>, elem: &SigElem) -> BridgeResult<Arc<TypeWrapper>> {
        match elem {
            SigElem::Boolean => Ok(self.primitive(PrimitiveKind::Boolean)),
            SigElem::Byte => Ok(self.primitive(PrimitiveKind::Byte)),
            SigElem::Char => Ok(self.primitive(PrimitiveKind::Char)),
            SigElem::Short => Ok(self.primitive(PrimitiveKind::Short)),
            SigElem::Int => Ok(self.primitive(PrimitiveKind::Int)),
            SigElem::Long => Ok(self.primitive(PrimitiveKind::Long)),
            SigElem::Float => Ok(self.primitive(PrimitiveKind::Float)),
            SigElem::Double => Ok(self.primitive(PrimitiveKind::Double)),
            SigElem::Void => Ok(self.primitive(PrimitiveKind::Void)),
            SigElem::Class(name) | SigElem::Array(name) => self.resolve_class(name),
        }
    }

    /// Argument wrappers of a method signature.
    pub fn arg_wrappers_from_sig(
        self: &Arc<Self>,
        sig: &str,
    ) -> BridgeResult<Vec<Arc<TypeWrapper>>> {
        let (args, _) = split_method_sig(sig)
            .map_err(|e| BridgeError::VerificationFailure(e.to_string()))?;
        args.iter().map(|e| self.wrapper_from_sig_elem(e)).collect()
    }

    /// Return wrapper of a method signature.
    pub fn ret_wrapper_from_sig(self: &Arc<Self>, sig: &str) -> BridgeResult<Arc<TypeWrapper>> {
        let (_, ret) = split_method_sig(sig)
            .map_err(|e| BridgeError::VerificationFailure(e.to_string()))?;
        self.wrapper_from_sig_elem(&ret)
    }

    /// Wrapper of a single field signature.
    pub fn wrapper_from_field_sig(self: &Arc<Self>, sig: &str) -> BridgeResult<Arc<TypeWrapper>> {
        self.ret_wrapper_from_sig(&format!("(){sig}"))
    }

    /// The canonical foreign signature element of a host type: primitive
    /// codes for value kinds, `L...;` (or the array-marker form) for
    /// reference types, using the foreign name of the type when one is
    /// registered.
    pub fn foreign_sig_name_of(&self, host: HostTypeId) -> String {
        let kind = self.engine.with_type(host, |t| t.kind.clone());
        match kind {
            HostTypeKind::Primitive(kind) => kind.sig_code().to_string(),
            HostTypeKind::Array { elem } => {
                format!("[{}", self.foreign_sig_name_of(elem))
            }
            HostTypeKind::Class | HostTypeKind::Interface => {
                let name = self
                    .wrapper_for_host_type(host)
                    .map(|w| w.name().to_string())
                    .unwrap_or_else(|| self.engine.type_name(host).replace('.', "/"));
                if name.starts_with('[') {
                    name
                } else {
                    format!("L{name};")
                }
            }
        }
    }

    /// Pin a method wrapper for the reflection facade.
    pub fn pin_method(&self, method: Arc<MethodWrapper>) -> MemberHandle {
        let mut handles = self.member_handles.write();
        handles.push(MemberRef::Method(method));
        MemberHandle(handles.len() - 1)
    }

    /// Pin a field wrapper for the reflection facade.
    pub fn pin_field(&self, field: Arc<FieldWrapper>) -> MemberHandle {
        let mut handles = self.member_handles.write();
        handles.push(MemberRef::Field(field));
        MemberHandle(handles.len() - 1)
    }

    /// The method behind a handle.
    pub fn method_from_handle(&self, handle: MemberHandle) -> Option<Arc<MethodWrapper>> {
        match self.member_handles.read().get(handle.0) {
            Some(MemberRef::Method(m)) => Some(m.clone()),
            _ => None,
        }
    }

    /// The field behind a handle.
    pub fn field_from_handle(&self, handle: MemberHandle) -> Option<Arc<FieldWrapper>> {
        match self.member_handles.read().get(handle.0) {
            Some(MemberRef::Field(f)) => Some(f.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("unit", &self.unit)
            .field("types", &self.types.len())
            .finish()
    }
}
