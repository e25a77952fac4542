//! Host engine registries
//!
//! Types, functions, objects, and static storage live in engine-owned
//! registries addressed by index handles. The engine is shared behind an
//! `Arc`; all tables use interior locking with tight scopes.

use std::sync::Arc;

use ferrule_classfile::Modifiers;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{BridgeError, BridgeResult};
use crate::host::body::MethodBody;
use crate::host::ty::{
    FieldAttribs, HostField, HostMethod, HostType, HostTypeKind, MethodAttribs, SlotId,
    TypeAttribs,
};
use crate::host::value::{
    HostFunctionId, HostTypeId, HostValue, ObjectRef, PrimitiveKind, UnitId,
};

/// Dotted host name of the universal root type.
pub const ROOT_TYPE_NAME: &str = "java.lang.Object";

/// A native implementation bound into the host function table.
pub type NativeFn =
    Arc<dyn Fn(&HostEngine, &[HostValue]) -> BridgeResult<HostValue> + Send + Sync>;

/// External native-call mechanism reached through generated trampolines.
///
/// Resolution is keyed by the foreign identity of the method; resolved
/// bindings are cached per function, at most once per process.
pub trait NativeInvoker: Send + Sync {
    /// Resolve the native implementation of a foreign method, if the
    /// mechanism knows one.
    fn resolve(&self, class: &str, name: &str, sig: &str) -> Option<NativeFn>;
}

/// Signature of a host function.
///
/// `params` excludes the receiver of instance functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSig {
    /// Parameter types
    pub params: Vec<HostTypeId>,
    /// Return type; `None` for void
    pub ret: Option<HostTypeId>,
    /// No receiver?
    pub is_static: bool,
}

/// The executable part of a host function
#[derive(Clone)]
pub enum FunctionBody {
    /// Not yet provided (builder state) or deliberately abstract
    Abstract,
    /// Emitted instructions
    Emitted(Arc<MethodBody>),
    /// Native implementation
    Native(NativeFn),
}

impl std::fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionBody::Abstract => write!(f, "Abstract"),
            FunctionBody::Emitted(body) => write!(f, "Emitted({} instrs)", body.code.len()),
            FunctionBody::Native(_) => write!(f, "Native"),
        }
    }
}

/// Identity of a native method for late binding through the external
/// native invoker
#[derive(Debug, Clone)]
pub struct NativeKey {
    /// Foreign class name (slash-separated)
    pub class: String,
    /// Method name
    pub name: String,
    /// Method signature
    pub sig: String,
}

/// One host executable
pub struct HostFunction {
    /// Table handle
    pub id: HostFunctionId,
    /// Function name (host-level)
    pub name: String,
    /// Declaring type
    pub owner: HostTypeId,
    /// Signature
    pub sig: FnSig,
    /// Attributes
    pub attribs: MethodAttribs,
    /// Body; replaced once when emission finishes
    pub body: RwLock<FunctionBody>,
    /// Foreign identity for late native binding
    pub native_key: Option<NativeKey>,
    /// Late-bound native pointer, populated at most once per process.
    /// Two racing threads may both resolve; one write wins, both get the
    /// same binding.
    pub native_cache: OnceCell<NativeFn>,
}

/// Payload of one arena object
#[derive(Debug, Clone)]
pub enum ObjectData {
    /// Class instance with field storage
    Instance {
        /// Runtime type
        ty: HostTypeId,
        /// Field slots, indexed by instance-field slot
        fields: Vec<HostValue>,
    },
    /// Array instance
    Array {
        /// Array type
        ty: HostTypeId,
        /// Elements
        elems: Vec<HostValue>,
    },
}

impl ObjectData {
    /// Runtime type of the object.
    pub fn type_id(&self) -> HostTypeId {
        match self {
            ObjectData::Instance { ty, .. } | ObjectData::Array { ty, .. } => *ty,
        }
    }
}

/// The host execution engine
pub struct HostEngine {
    types: RwLock<Vec<HostType>>,
    functions: RwLock<Vec<Arc<HostFunction>>>,
    objects: RwLock<Vec<Arc<Mutex<ObjectData>>>>,
    statics: RwLock<FxHashMap<(HostTypeId, u16), HostValue>>,
    /// Types whose class initializer has run or is running
    initialized: Mutex<FxHashSet<HostTypeId>>,
    array_types: RwLock<FxHashMap<HostTypeId, HostTypeId>>,
    monitors: RwLock<FxHashMap<ObjectRef, Arc<Mutex<()>>>>,
    slot_arities: RwLock<FxHashMap<SlotId, usize>>,
    native_invoker: RwLock<Option<Arc<dyn NativeInvoker>>>,
    next_slot: Mutex<u32>,
    next_unit: Mutex<u32>,
    primitives: [HostTypeId; 9],
    object_type: HostTypeId,
}

impl HostEngine {
    /// New engine with the primitive types and the root object type
    /// pre-registered.
    pub fn new() -> Arc<HostEngine> {
        let mut types = Vec::new();
        let mut primitives = [HostTypeId(0); 9];
        for (i, kind) in PrimitiveKind::ALL.iter().enumerate() {
            let id = HostTypeId(types.len());
            primitives[i] = id;
            types.push(HostType {
                id,
                name: kind.keyword().to_string(),
                attribs: TypeAttribs::PUBLIC | TypeAttribs::SEALED | TypeAttribs::VALUE_TYPE,
                kind: HostTypeKind::Primitive(*kind),
                unit: UnitId::PREBUILT,
                base: None,
                interfaces: Vec::new(),
                enclosing: None,
                fields: Vec::new(),
                instance_field_start: 0,
                instance_field_total: 0,
                methods: Vec::new(),
                slot_bindings: FxHashMap::default(),
                clinit: None,
                foreign_modifiers: None,
                completed: true,
            });
        }
        let object_type = HostTypeId(types.len());
        types.push(HostType {
            id: object_type,
            name: ROOT_TYPE_NAME.to_string(),
            attribs: TypeAttribs::PUBLIC,
            kind: HostTypeKind::Class,
            unit: UnitId::PREBUILT,
            base: None,
            interfaces: Vec::new(),
            enclosing: None,
            fields: Vec::new(),
            instance_field_start: 0,
            instance_field_total: 0,
            methods: Vec::new(),
            slot_bindings: FxHashMap::default(),
            clinit: None,
            foreign_modifiers: None,
            completed: true,
        });
        let engine = Arc::new(HostEngine {
            types: RwLock::new(types),
            functions: RwLock::new(Vec::new()),
            objects: RwLock::new(Vec::new()),
            statics: RwLock::new(FxHashMap::default()),
            initialized: Mutex::new(FxHashSet::default()),
            array_types: RwLock::new(FxHashMap::default()),
            monitors: RwLock::new(FxHashMap::default()),
            slot_arities: RwLock::new(FxHashMap::default()),
            native_invoker: RwLock::new(None),
            next_slot: Mutex::new(0),
            next_unit: Mutex::new(1),
            primitives,
            object_type,
        });
        // the root constructor: a no-op instance initializer
        let ctor = engine.add_function(
            "<init>".to_string(),
            object_type,
            FnSig {
                params: Vec::new(),
                ret: None,
                is_static: false,
            },
            MethodAttribs::PUBLIC,
            None,
        );
        engine.set_function_body(
            ctor,
            FunctionBody::Emitted(Arc::new(MethodBody {
                code: vec![crate::host::body::Instr::Return],
            })),
        );
        {
            let mut types = engine.types.write();
            types[object_type.0].methods.push(HostMethod {
                name: "<init>".to_string(),
                function: ctor,
                attribs: MethodAttribs::PUBLIC,
                slot: None,
                foreign_modifiers: None,
            });
        }
        engine
    }

    /// The pre-registered root object type.
    pub fn object_type(&self) -> HostTypeId {
        self.object_type
    }

    /// The pre-registered host type of a primitive.
    pub fn primitive_type(&self, kind: PrimitiveKind) -> HostTypeId {
        let idx = PrimitiveKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(0);
        self.primitives[idx]
    }

    /// Allocate a fresh compilation unit.
    pub fn new_unit(&self) -> UnitId {
        let mut next = self.next_unit.lock();
        let unit = UnitId(*next);
        *next += 1;
        unit
    }

    /// Allocate a fresh dispatch slot.
    pub fn new_slot(&self) -> SlotId {
        let mut next = self.next_slot.lock();
        let slot = SlotId(*next);
        *next += 1;
        slot
    }

    /// Register a new type record; the caller decides whether it starts as
    /// a builder shell (`completed == false`) or a finished type.
    pub fn register_type(&self, mut ty: HostType) -> HostTypeId {
        let mut types = self.types.write();
        let id = HostTypeId(types.len());
        ty.id = id;
        types.push(ty);
        id
    }

    /// Read access to a type record.
    pub fn with_type<R>(&self, id: HostTypeId, f: impl FnOnce(&HostType) -> R) -> R {
        let types = self.types.read();
        f(&types[id.0])
    }

    /// Write access to a type record.
    pub(crate) fn with_type_mut<R>(&self, id: HostTypeId, f: impl FnOnce(&mut HostType) -> R) -> R {
        let mut types = self.types.write();
        f(&mut types[id.0])
    }

    /// Snapshot of a type record.
    pub fn type_snapshot(&self, id: HostTypeId) -> HostType {
        self.types.read()[id.0].clone()
    }

    /// Dotted name of a type.
    pub fn type_name(&self, id: HostTypeId) -> String {
        self.with_type(id, |t| t.name.clone())
    }

    /// Is the type completed, walking array element chains?
    ///
    /// A builder shell anywhere in the element chain means the handle must
    /// not be treated as a finished type.
    pub fn is_type_finished(&self, id: HostTypeId) -> bool {
        let types = self.types.read();
        let mut cur = &types[id.0];
        loop {
            match &cur.kind {
                HostTypeKind::Array { elem } => cur = &types[elem.0],
                _ => return cur.completed,
            }
        }
    }

    /// Is `ty` the same as or derived from `ancestor` (classes only)?
    pub fn type_extends(&self, ty: HostTypeId, ancestor: HostTypeId) -> bool {
        let types = self.types.read();
        let mut cur = Some(ty);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = types[id.0].base;
        }
        false
    }

    /// Does `ty` implement `iface`, directly or through bases and
    /// super-interfaces?
    pub fn type_implements(&self, ty: HostTypeId, iface: HostTypeId) -> bool {
        let types = self.types.read();
        fn walk(types: &[HostType], ty: HostTypeId, iface: HostTypeId) -> bool {
            let mut cur = Some(ty);
            while let Some(id) = cur {
                let t = &types[id.0];
                for i in &t.interfaces {
                    if *i == iface || walk(types, *i, iface) {
                        return true;
                    }
                }
                cur = t.base;
            }
            false
        }
        ty == iface || walk(&types, ty, iface)
    }

    /// Is a value of runtime type `ty` assignable to `target` at host
    /// level?
    pub fn type_conforms(&self, ty: HostTypeId, target: HostTypeId) -> bool {
        if ty == target {
            return true;
        }
        let target_is_iface = self.with_type(target, |t| t.is_interface());
        if target_is_iface {
            self.type_implements(ty, target)
        } else if target == self.object_type {
            true
        } else {
            // arrays: element conformance at equal rank
            let pair = self.with_type(ty, |a| {
                if let HostTypeKind::Array { elem } = a.kind {
                    Some(elem)
                } else {
                    None
                }
            })
            .zip(self.with_type(target, |b| {
                if let HostTypeKind::Array { elem } = b.kind {
                    Some(elem)
                } else {
                    None
                }
            }));
            if let Some((e1, e2)) = pair {
                let e1_primitive = self.with_type(e1, |t| matches!(t.kind, HostTypeKind::Primitive(_)));
                let e2_primitive = self.with_type(e2, |t| matches!(t.kind, HostTypeKind::Primitive(_)));
                if e1_primitive || e2_primitive {
                    return e1 == e2;
                }
                return self.type_conforms(e1, e2);
            }
            self.type_extends(ty, target)
        }
    }

    /// The array type over an element type, creating the record on first
    /// use. Array types complete together with their element chain.
    pub fn array_type_of(&self, elem: HostTypeId) -> HostTypeId {
        if let Some(id) = self.array_types.read().get(&elem) {
            return *id;
        }
        let name = format!("{}[]", self.type_name(elem));
        let id = self.register_type(HostType {
            id: HostTypeId(0),
            name,
            attribs: TypeAttribs::PUBLIC | TypeAttribs::SEALED,
            kind: HostTypeKind::Array { elem },
            unit: UnitId::PREBUILT,
            base: Some(self.object_type),
            interfaces: Vec::new(),
            enclosing: None,
            fields: Vec::new(),
            instance_field_start: 0,
            instance_field_total: 0,
            methods: Vec::new(),
            slot_bindings: FxHashMap::default(),
            clinit: None,
            foreign_modifiers: None,
            completed: true,
        });
        self.array_types.write().insert(elem, id);
        id
    }

    /// Add a function record with an abstract placeholder body.
    pub fn add_function(
        &self,
        name: String,
        owner: HostTypeId,
        sig: FnSig,
        attribs: MethodAttribs,
        native_key: Option<NativeKey>,
    ) -> HostFunctionId {
        let mut functions = self.functions.write();
        let id = HostFunctionId(functions.len());
        functions.push(Arc::new(HostFunction {
            id,
            name,
            owner,
            sig,
            attribs,
            body: RwLock::new(FunctionBody::Abstract),
            native_key,
            native_cache: OnceCell::new(),
        }));
        id
    }

    /// A function record.
    pub fn function(&self, id: HostFunctionId) -> Arc<HostFunction> {
        self.functions.read()[id.0].clone()
    }

    /// Replace a function's body. Done once, when emission reaches it.
    pub fn set_function_body(&self, id: HostFunctionId, body: FunctionBody) {
        let function = self.function(id);
        *function.body.write() = body;
    }

    /// Locate a method by name and exact parameter types, walking the base
    /// chain. `want_static` of `None` accepts either binding kind.
    pub fn find_method(
        &self,
        ty: HostTypeId,
        name: &str,
        params: &[HostTypeId],
        want_static: Option<bool>,
    ) -> Option<HostFunctionId> {
        let mut cur = Some(ty);
        while let Some(id) = cur {
            let found = self.with_type(id, |t| {
                for m in t.methods_named(name) {
                    let function = self.function(m.function);
                    if function.sig.params == params {
                        if let Some(stat) = want_static {
                            if function.sig.is_static != stat {
                                continue;
                            }
                        }
                        return Some(m.function);
                    }
                }
                None
            });
            if found.is_some() {
                return found;
            }
            cur = self.with_type(id, |t| t.base);
        }
        None
    }

    /// Locate a declared field by name, walking the base chain. Returns
    /// the declaring type and the field row.
    pub fn find_field(&self, ty: HostTypeId, name: &str) -> Option<(HostTypeId, HostField)> {
        let mut cur = Some(ty);
        while let Some(id) = cur {
            let found = self.with_type(id, |t| t.field_named(name).cloned());
            if let Some(field) = found {
                return Some((id, field));
            }
            cur = self.with_type(id, |t| t.base);
        }
        None
    }

    /// Resolve a dispatch slot against the runtime type of a receiver,
    /// most-derived binding first.
    pub fn resolve_slot(&self, ty: HostTypeId, slot: SlotId) -> Option<HostFunctionId> {
        let types = self.types.read();
        let mut cur = Some(ty);
        while let Some(id) = cur {
            let t = &types[id.0];
            if let Some(f) = t.slot_bindings.get(&slot) {
                return Some(*f);
            }
            cur = t.base;
        }
        None
    }

    /// Allocate an instance with default-initialized fields. The type
    /// must be completed; a builder shell has no settled field layout.
    pub fn allocate(&self, ty: HostTypeId) -> BridgeResult<ObjectRef> {
        let (is_abstract, completed, field_count) = self.with_type(ty, |t| {
            (
                t.is_abstract() || t.is_interface(),
                t.completed,
                t.instance_field_total as usize,
            )
        });
        if is_abstract || !completed {
            return Err(BridgeError::IllegalState(format!(
                "cannot instantiate {}",
                self.type_name(ty)
            )));
        }
        let mut objects = self.objects.write();
        let r = ObjectRef(objects.len());
        objects.push(Arc::new(Mutex::new(ObjectData::Instance {
            ty,
            fields: vec![HostValue::Null; field_count],
        })));
        Ok(r)
    }

    /// Allocate an array object.
    pub fn allocate_array(&self, ty: HostTypeId, elems: Vec<HostValue>) -> ObjectRef {
        let mut objects = self.objects.write();
        let r = ObjectRef(objects.len());
        objects.push(Arc::new(Mutex::new(ObjectData::Array { ty, elems })));
        r
    }

    /// The shared cell of an arena object.
    pub fn object(&self, r: ObjectRef) -> BridgeResult<Arc<Mutex<ObjectData>>> {
        self.objects
            .read()
            .get(r.0)
            .cloned()
            .ok_or(BridgeError::NullReference)
    }

    /// Runtime type of an object.
    pub fn object_type_of(&self, r: ObjectRef) -> BridgeResult<HostTypeId> {
        Ok(self.object(r)?.lock().type_id())
    }

    /// Read a static field slot (default value until first written).
    pub fn get_static(&self, ty: HostTypeId, index: u16) -> HostValue {
        if let Some(v) = self.statics.read().get(&(ty, index)) {
            return v.clone();
        }
        HostValue::Null
    }

    /// Write a static field slot.
    pub fn put_static(&self, ty: HostTypeId, index: u16, value: HostValue) {
        self.statics.write().insert((ty, index), value);
    }

    /// Run the class initializer of a type once. Re-entrant requests while
    /// the initializer is running return immediately, mirroring foreign
    /// initialization semantics.
    pub fn ensure_initialized(&self, ty: HostTypeId) -> BridgeResult<()> {
        let clinit = {
            let mut initialized = self.initialized.lock();
            if !initialized.insert(ty) {
                return Ok(());
            }
            self.with_type(ty, |t| t.clinit)
        };
        if let Some(f) = clinit {
            self.invoke_function(f, Vec::new())?;
        }
        Ok(())
    }

    /// Number of registered types; used by tests asserting exactly-once
    /// type creation.
    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }

    /// Types declared nested inside the given one.
    pub fn types_enclosed_by(&self, id: HostTypeId) -> Vec<HostTypeId> {
        self.types
            .read()
            .iter()
            .filter(|t| t.enclosing == Some(id))
            .map(|t| t.id)
            .collect()
    }

    /// The monitor of an arena object.
    pub fn monitor_of(&self, r: ObjectRef) -> Arc<Mutex<()>> {
        if let Some(m) = self.monitors.read().get(&r) {
            return m.clone();
        }
        self.monitors
            .write()
            .entry(r)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record the call arity of a dispatch slot (receiver included).
    pub fn record_slot_arity(&self, slot: SlotId, arity: usize) {
        self.slot_arities.write().entry(slot).or_insert(arity);
    }

    /// Call arity of a dispatch slot.
    pub fn slot_arity(&self, slot: SlotId) -> BridgeResult<usize> {
        self.slot_arities
            .read()
            .get(&slot)
            .copied()
            .ok_or_else(|| BridgeError::IllegalState("dispatch through unknown slot".into()))
    }

    /// Install the external native-call mechanism.
    pub fn set_native_invoker(&self, invoker: Arc<dyn NativeInvoker>) {
        *self.native_invoker.write() = Some(invoker);
    }

    /// Resolve a native binding through the installed mechanism.
    pub(crate) fn resolve_native(&self, key: &NativeKey) -> Option<NativeFn> {
        let invoker = self.native_invoker.read().clone()?;
        invoker.resolve(&key.class, &key.name, &key.sig)
    }

    /// Modifiers note of a type, when recorded.
    pub fn foreign_modifiers_of(&self, id: HostTypeId) -> Option<Modifiers> {
        self.with_type(id, |t| t.foreign_modifiers)
    }

    /// Is a field row a literal constant?
    pub fn field_is_literal(&self, ty: HostTypeId, name: &str) -> bool {
        self.with_type(ty, |t| {
            t.field_named(name)
                .map(|f| f.attribs.contains(FieldAttribs::LITERAL))
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for HostEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEngine")
            .field("types", &self.types.read().len())
            .field("functions", &self.functions.read().len())
            .field("objects", &self.objects.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_registry() {
        let engine = HostEngine::new();
        let object = engine.object_type();
        assert_eq!(engine.type_name(object), ROOT_TYPE_NAME);
        assert!(engine.is_type_finished(object));
        let int = engine.primitive_type(PrimitiveKind::Int);
        assert_eq!(engine.type_name(int), "int");
    }

    #[test]
    fn test_array_type_interning() {
        let engine = HostEngine::new();
        let int = engine.primitive_type(PrimitiveKind::Int);
        let a1 = engine.array_type_of(int);
        let a2 = engine.array_type_of(int);
        assert_eq!(a1, a2);
        assert_eq!(engine.type_name(a1), "int[]");
    }

    #[test]
    fn test_slot_allocation_is_unique() {
        let engine = HostEngine::new();
        let s1 = engine.new_slot();
        let s2 = engine.new_slot();
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_host_conformance_object_root() {
        let engine = HostEngine::new();
        let object = engine.object_type();
        let int_arr = engine.array_type_of(engine.primitive_type(PrimitiveKind::Int));
        assert!(engine.type_conforms(int_arr, object));
        assert!(!engine.type_conforms(object, int_arr));
    }

    #[test]
    fn test_statics_default_and_store() {
        let engine = HostEngine::new();
        let object = engine.object_type();
        assert_eq!(engine.get_static(object, 7), HostValue::Null);
        engine.put_static(object, 7, HostValue::Int(42));
        assert_eq!(engine.get_static(object, 7), HostValue::Int(42));
    }
}
