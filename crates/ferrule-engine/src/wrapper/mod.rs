//! Type wrappers
//!
//! A wrapper is the bridge's runtime representation of one foreign class,
//! independent of whether a host type exists for it yet. Wrappers for one
//! foreign name within one loader context are a single instance (the
//! loader's intern table is the identity authority), so all identity
//! comparisons here are pointer comparisons.

pub mod array;
pub mod compiled;
pub mod declared;
pub mod dynamic;
pub mod remapped;
pub mod stubs;

use std::sync::{Arc, Weak};

use ferrule_classfile::{package_of, Modifiers};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::descriptor::MethodDescriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::host::value::{HostTypeId, PrimitiveKind};
use crate::loader::LoaderContext;
use crate::member::{FieldWrapper, MethodWrapper};

pub use remapped::{
    CtorRemap, CtorRemapKind, FieldRemap, MethodRemap, MethodRemapKind, Redirect, RemapSpec,
};

/// Verifier-only wrapper kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierKind {
    /// The null type: assignable to every reference type
    Null,
}

pub(crate) enum WrapperKind {
    Primitive {
        kind: PrimitiveKind,
        host: HostTypeId,
    },
    Unloadable,
    Verifier(VerifierKind),
    Dynamic(dynamic::DynamicData),
    Remapped(remapped::RemappedData),
    Declared(declared::DeclaredData),
    Compiled(compiled::CompiledData),
    Array(array::ArrayData),
}

/// The bridge's representation of one foreign class
pub struct TypeWrapper {
    loader: Weak<LoaderContext>,
    name: String,
    modifiers: Modifiers,
    base: Option<Arc<TypeWrapper>>,
    methods: RwLock<FxHashMap<MethodDescriptor, Arc<MethodWrapper>>>,
    fields: RwLock<FxHashMap<String, Arc<FieldWrapper>>>,
    pub(crate) kind: WrapperKind,
}

impl TypeWrapper {
    pub(crate) fn new(
        loader: &Arc<LoaderContext>,
        name: impl Into<String>,
        modifiers: Modifiers,
        base: Option<Arc<TypeWrapper>>,
        kind: WrapperKind,
    ) -> Arc<TypeWrapper> {
        Arc::new(TypeWrapper {
            loader: Arc::downgrade(loader),
            name: name.into(),
            modifiers,
            base,
            methods: RwLock::new(FxHashMap::default()),
            fields: RwLock::new(FxHashMap::default()),
            kind,
        })
    }

    /// Foreign name (slash-separated; arrays carry leading `[` markers).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Foreign flag word.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// The owning loader context.
    pub fn loader(&self) -> Arc<LoaderContext> {
        self.loader
            .upgrade()
            .expect("loader context dropped while wrappers are live")
    }

    fn same_loader(&self, other: &TypeWrapper) -> bool {
        Weak::ptr_eq(&self.loader, &other.loader)
    }

    /// Base type wrapper (a lookup relation, not ownership of the base).
    pub fn base_wrapper(&self) -> Option<&Arc<TypeWrapper>> {
        self.base.as_ref()
    }

    /// Is this one of the nine primitive singletons?
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, WrapperKind::Primitive { .. })
    }

    /// The primitive kind, for primitive wrappers.
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self.kind {
            WrapperKind::Primitive { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Placeholder for a class that could not be resolved?
    pub fn is_unloadable(&self) -> bool {
        self.modifiers == Modifiers::UNLOADABLE_MARKER
            && matches!(self.kind, WrapperKind::Unloadable)
    }

    /// Verifier-only synthetic wrapper?
    pub fn is_verifier(&self) -> bool {
        matches!(self.kind, WrapperKind::Verifier(_))
    }

    /// The designated null-type wrapper?
    pub fn is_null_type(&self) -> bool {
        matches!(self.kind, WrapperKind::Verifier(VerifierKind::Null))
    }

    /// Array wrapper (name carries leading rank markers)?
    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Array rank; 0 for non-arrays.
    pub fn array_rank(&self) -> usize {
        self.name.bytes().take_while(|b| *b == b'[').count()
    }

    /// Public flag set?
    pub fn is_public(&self) -> bool {
        self.modifiers.is_public()
    }

    /// Abstract flag set?
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract()
    }

    /// Final flag set?
    pub fn is_final(&self) -> bool {
        self.modifiers.is_final()
    }

    /// Interface?
    pub fn is_interface(&self) -> bool {
        match &self.kind {
            WrapperKind::Dynamic(data) => data.class.modifiers.is_interface(),
            WrapperKind::Remapped(data) => {
                let loader = self.loader();
                loader.engine().with_type(data.host, |t| t.is_interface())
            }
            WrapperKind::Declared(data) => {
                let loader = self.loader();
                loader.engine().with_type(data.host, |t| t.is_interface())
            }
            WrapperKind::Compiled(data) => {
                let loader = self.loader();
                loader.engine().with_type(data.host, |t| t.is_interface())
            }
            _ => false,
        }
    }

    /// A non-primitive wrapper whose host type is a value type.
    pub fn is_non_primitive_value_type(&self) -> bool {
        if self.is_primitive() {
            return false;
        }
        match self.host_type() {
            Ok(host) => self.loader().engine().with_type(host, |t| t.is_value_type()),
            Err(_) => false,
        }
    }

    /// The host execution-engine handle of this wrapper.
    ///
    /// Stable once the wrapper reaches the finished state; for dynamic
    /// wrappers before that, the handle refers to an in-progress builder
    /// shell that must never be treated as a complete type
    /// (see [`TypeWrapper::is_host_type_finished`]).
    pub fn host_type(&self) -> BridgeResult<HostTypeId> {
        match &self.kind {
            WrapperKind::Primitive { host, .. } => Ok(*host),
            WrapperKind::Unloadable => Err(BridgeError::IllegalState(format!(
                "host type requested for unloadable class {}",
                self.name
            ))),
            WrapperKind::Verifier(_) => Err(BridgeError::IllegalState(format!(
                "host type requested for verifier type {}",
                self.name
            ))),
            WrapperKind::Dynamic(data) => Ok(data.host),
            WrapperKind::Remapped(data) => Ok(data.host),
            WrapperKind::Declared(data) => Ok(data.host),
            WrapperKind::Compiled(data) => Ok(data.host),
            WrapperKind::Array(data) => Ok(data.host),
        }
    }

    /// Host handle with unloadable (and null-type) degradation to the
    /// root object type.
    pub fn host_type_or_object(&self) -> HostTypeId {
        match self.host_type() {
            Ok(host) => host,
            Err(_) => self.loader().engine().object_type(),
        }
    }

    /// Is the host type complete, walking array element chains?
    pub fn is_host_type_finished(&self) -> bool {
        match self.host_type() {
            Ok(host) => self.loader().engine().is_type_finished(host),
            Err(_) => false,
        }
    }

    /// Directly implemented interfaces.
    pub fn interfaces(&self) -> Vec<Arc<TypeWrapper>> {
        match &self.kind {
            WrapperKind::Dynamic(data) => data.interfaces.clone(),
            WrapperKind::Remapped(data) => data.interfaces.read().clone(),
            WrapperKind::Compiled(data) => data.interfaces(self),
            _ => Vec::new(),
        }
    }

    /// Wrappers of classes nested directly inside this one.
    pub fn inner_classes(self: &Arc<Self>) -> Vec<Arc<TypeWrapper>> {
        match &self.kind {
            WrapperKind::Dynamic(data) => data.inner_classes(self),
            WrapperKind::Compiled(data) => data.inner_classes(self),
            _ => Vec::new(),
        }
    }

    /// Wrapper of the lexically enclosing class, if any.
    pub fn declaring_type(self: &Arc<Self>) -> Option<Arc<TypeWrapper>> {
        match &self.kind {
            WrapperKind::Dynamic(data) => data.declaring_type(self),
            WrapperKind::Compiled(data) => data.declaring_type(self),
            _ => None,
        }
    }

    /// The element wrapper of an array wrapper.
    pub fn element_wrapper(&self) -> BridgeResult<Arc<TypeWrapper>> {
        let bytes = self.name.as_bytes();
        if bytes.first() != Some(&b'[') {
            return Err(BridgeError::IllegalState(format!(
                "{} is not an array",
                self.name
            )));
        }
        let loader = self.loader();
        match bytes[1] {
            b'[' => loader.resolve_class(&self.name[1..]),
            b'L' => loader.resolve_class(&self.name[2..self.name.len() - 1]),
            code => match PrimitiveKind::from_sig_code(code) {
                Some(kind) if kind != PrimitiveKind::Void => Ok(loader.primitive(kind)),
                _ => Err(BridgeError::IllegalState(format!(
                    "malformed array name {}",
                    self.name
                ))),
            },
        }
    }

    /// Package portion of the foreign name.
    pub fn package_name(&self) -> &str {
        package_of(&self.name)
    }

    /// Same loader context and same package?
    pub fn is_in_same_package_as(&self, other: &TypeWrapper) -> bool {
        self.same_loader(other) && self.package_name() == other.package_name()
    }

    /// May `from` access this type?
    pub fn is_accessible_from(&self, from: &TypeWrapper) -> bool {
        self.is_public() || self.is_in_same_package_as(from)
    }

    /// Register a method wrapper. Re-adding overwrites by descriptor.
    pub fn add_method(&self, method: Arc<MethodWrapper>) {
        self.methods
            .write()
            .insert(method.descriptor().clone(), method);
    }

    /// Register a field wrapper. Re-adding overwrites by name.
    pub fn add_field(&self, field: Arc<FieldWrapper>) {
        self.fields.write().insert(field.name().to_string(), field);
    }

    /// Snapshot of the known method wrappers.
    pub fn get_methods(&self) -> Vec<Arc<MethodWrapper>> {
        self.methods.read().values().cloned().collect()
    }

    /// Snapshot of the known field wrappers.
    pub fn get_fields(&self) -> Vec<Arc<FieldWrapper>> {
        self.fields.read().values().cloned().collect()
    }

    /// Member lookup: local cache, then the variant resolver, then (when
    /// `inherit` is set) the base chain. Only wrapper-local resolutions
    /// are cached here; every level re-queries its own cache only.
    ///
    /// `Ok(None)` means not found; errors are reserved for
    /// construction-grade problems (illegal state, verification).
    pub fn get_method_wrapper(
        self: &Arc<Self>,
        md: &MethodDescriptor,
        inherit: bool,
    ) -> BridgeResult<Option<Arc<MethodWrapper>>> {
        if let Some(hit) = self.methods.read().get(md) {
            return Ok(Some(hit.clone()));
        }
        match self.resolve_method_impl(md)? {
            Some(method) => {
                self.methods.write().insert(md.clone(), method.clone());
                Ok(Some(method))
            }
            None => {
                if inherit {
                    if let Some(base) = &self.base {
                        return base.get_method_wrapper(md, inherit);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Field lookup; same shape as method lookup, keyed by name.
    pub fn get_field_wrapper(
        self: &Arc<Self>,
        name: &str,
    ) -> BridgeResult<Option<Arc<FieldWrapper>>> {
        if let Some(hit) = self.fields.read().get(name) {
            return Ok(Some(hit.clone()));
        }
        match self.resolve_field_impl(name)? {
            Some(field) => {
                self.fields
                    .write()
                    .insert(name.to_string(), field.clone());
                Ok(Some(field))
            }
            None => {
                if let Some(base) = &self.base {
                    return base.get_field_wrapper(name);
                }
                Ok(None)
            }
        }
    }

    fn resolve_method_impl(
        self: &Arc<Self>,
        md: &MethodDescriptor,
    ) -> BridgeResult<Option<Arc<MethodWrapper>>> {
        match &self.kind {
            WrapperKind::Primitive { .. } => Ok(None),
            WrapperKind::Unloadable => Err(BridgeError::IllegalState(format!(
                "method resolution on unloadable class {}",
                self.name
            ))),
            WrapperKind::Verifier(_) => Err(BridgeError::IllegalState(format!(
                "method resolution on verifier type {}",
                self.name
            ))),
            WrapperKind::Dynamic(data) => dynamic::resolve_method(self, data, md),
            // remapped and array members are loaded eagerly into the cache
            WrapperKind::Remapped(_) | WrapperKind::Array(_) => Ok(None),
            WrapperKind::Declared(data) => declared::resolve_method(self, data, md),
            WrapperKind::Compiled(data) => compiled::resolve_method(self, data, md),
        }
    }

    fn resolve_field_impl(
        self: &Arc<Self>,
        name: &str,
    ) -> BridgeResult<Option<Arc<FieldWrapper>>> {
        match &self.kind {
            WrapperKind::Primitive { .. } => Ok(None),
            WrapperKind::Unloadable => Err(BridgeError::IllegalState(format!(
                "field resolution on unloadable class {}",
                self.name
            ))),
            WrapperKind::Verifier(_) => Err(BridgeError::IllegalState(format!(
                "field resolution on verifier type {}",
                self.name
            ))),
            WrapperKind::Dynamic(data) => dynamic::resolve_field(self, data, name),
            WrapperKind::Remapped(_) | WrapperKind::Array(_) => Ok(None),
            WrapperKind::Declared(data) => declared::resolve_field(self, data, name),
            WrapperKind::Compiled(data) => compiled::resolve_field(self, data, name),
        }
    }

    /// Recursive check over direct interfaces, their transitive
    /// interfaces, and the base chain. Identity is instance identity.
    pub fn implements_interface(&self, iface: &Arc<TypeWrapper>) -> bool {
        let mut current: &TypeWrapper = self;
        loop {
            for implemented in current.interfaces() {
                if Arc::ptr_eq(&implemented, iface) || implemented.implements_interface(iface) {
                    return true;
                }
            }
            match &current.base {
                Some(base) => current = base,
                None => return false,
            }
        }
    }

    /// Subtype query. For an interface base: identity or interface
    /// implementation. Otherwise: walk the base chain; the universal root
    /// matches everything. Neither side may be primitive.
    pub fn is_sub_type_of(self: &Arc<Self>, base: &Arc<TypeWrapper>) -> bool {
        debug_assert!(!self.is_primitive());
        debug_assert!(!base.is_primitive());
        if base.is_interface() {
            if Arc::ptr_eq(self, base) {
                return true;
            }
            return self.implements_interface(base);
        }
        let root = self.loader().root_wrapper();
        // required, not only a shortcut: interfaces have no base chain to
        // the root
        if Arc::ptr_eq(base, &root) {
            return true;
        }
        let mut sub: &TypeWrapper = self;
        while !std::ptr::eq(sub, Arc::as_ptr(base)) {
            match &sub.base {
                Some(b) => sub = b,
                None => return false,
            }
        }
        true
    }

    /// Assignability query.
    ///
    /// Identity first; primitives are never assignable through this path;
    /// the null type is assignable to everything; matched-rank arrays
    /// strip dimensions and compare elements, with a non-primitive
    /// value-type source element disqualifying the assignment; everything
    /// else falls back to the subtype walk.
    pub fn is_assignable_to(self: &Arc<Self>, other: &Arc<TypeWrapper>) -> bool {
        if Arc::ptr_eq(self, other) {
            return true;
        }
        if self.is_primitive() || other.is_primitive() {
            return false;
        }
        if self.is_null_type() {
            return true;
        }
        let mut rank1 = self.array_rank();
        let mut rank2 = other.array_rank();
        if rank1 > 0 && rank2 > 0 {
            rank1 -= 1;
            rank2 -= 1;
            let (mut elem1, mut elem2) = match (self.element_wrapper(), other.element_wrapper()) {
                (Ok(e1), Ok(e2)) => (e1, e2),
                _ => return false,
            };
            while rank1 != 0 && rank2 != 0 {
                let next = match (elem1.element_wrapper(), elem2.element_wrapper()) {
                    (Ok(e1), Ok(e2)) => (e1, e2),
                    _ => return false,
                };
                elem1 = next.0;
                elem2 = next.1;
                rank1 -= 1;
                rank2 -= 1;
            }
            if elem1.is_primitive() || elem2.is_primitive() {
                // distinct primitives at matched rank never assign; equal
                // ones were caught by the identity check on the arrays
                return Arc::ptr_eq(&elem1, &elem2);
            }
            return !elem1.is_non_primitive_value_type() && elem1.is_sub_type_of(&elem2);
        }
        self.is_sub_type_of(other)
    }

    /// One-time transition turning a declaration into an executable host
    /// type. Idempotent; concurrent callers converge on one execution.
    pub fn finish(self: &Arc<Self>) -> BridgeResult<()> {
        match &self.kind {
            WrapperKind::Primitive { .. }
            | WrapperKind::Remapped(_)
            | WrapperKind::Declared(_)
            | WrapperKind::Compiled(_) => Ok(()),
            WrapperKind::Unloadable => Err(BridgeError::IllegalState(format!(
                "finish requested for unloadable class {}",
                self.name
            ))),
            WrapperKind::Verifier(_) => Err(BridgeError::IllegalState(format!(
                "finish requested for verifier type {}",
                self.name
            ))),
            WrapperKind::Dynamic(_) => dynamic::finish(self),
            WrapperKind::Array(_) => array::finish(self),
        }
    }
}

impl std::fmt::Debug for TypeWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            WrapperKind::Primitive { .. } => "Primitive",
            WrapperKind::Unloadable => "Unloadable",
            WrapperKind::Verifier(_) => "Verifier",
            WrapperKind::Dynamic(_) => "Dynamic",
            WrapperKind::Remapped(_) => "Remapped",
            WrapperKind::Declared(_) => "Declared",
            WrapperKind::Compiled(_) => "Compiled",
            WrapperKind::Array(_) => "Array",
        };
        write!(f, "{kind}TypeWrapper[{}]", self.name)
    }
}
