//! Method and field wrappers
//!
//! A member wrapper binds a descriptor to host executable or storage
//! entities plus the emission strategies other generated code uses to
//! reach it: ordinary call, virtual call, and construct for methods; get
//! and set for fields. Wrappers are immutable once constructed and are
//! owned exclusively by the declaring type wrapper's member cache.
//!
//! Reflective invocation reuses the emission strategies: a small thunk
//! body is synthesized from them and executed, so reflection and compiled
//! code always agree on member semantics.

use std::sync::{Arc, Weak};

use ferrule_classfile::Modifiers;

use crate::descriptor::MethodDescriptor;
use crate::emit::CodeEmitter;
use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody};
use crate::host::ty::SlotId;
use crate::host::value::{HostFunctionId, HostTypeId, HostValue, PrimitiveKind};
use crate::wrapper::TypeWrapper;

fn shape_matches(wrapper: &TypeWrapper, value: &HostValue) -> bool {
    match wrapper.primitive_kind() {
        Some(kind) => value.primitive_kind() == Some(kind),
        None => value.is_reference(),
    }
}

/// Runtime handle for one foreign method
pub struct MethodWrapper {
    declaring: Weak<TypeWrapper>,
    descriptor: MethodDescriptor,
    modifiers: Modifiers,
    function: Option<HostFunctionId>,
    redirect: Option<HostFunctionId>,
    emit_call: Option<CodeEmitter>,
    emit_call_virtual: Option<CodeEmitter>,
    emit_construct: Option<CodeEmitter>,
    remapped_override: bool,
    remapped_virtual: bool,
}

impl MethodWrapper {
    /// Wrapper over a host function with the standard emission strategies
    /// for its shape (constructor, static, or virtual), including boxing
    /// of value-type returns.
    pub fn create(
        declaring: &Arc<TypeWrapper>,
        descriptor: MethodDescriptor,
        function: HostFunctionId,
        modifiers: Modifiers,
    ) -> BridgeResult<Arc<MethodWrapper>> {
        let loader = declaring.loader();
        let engine = loader.engine();
        let record = engine.function(function);
        let is_ctor = descriptor.name() == "<init>";
        let slot = engine.with_type(record.owner, |t| {
            t.methods
                .iter()
                .find(|m| m.function == function)
                .and_then(|m| m.slot)
        });

        let mut emit_call = Some(CodeEmitter::call(function));
        let mut emit_call_virtual = if is_ctor {
            None
        } else if record.sig.is_static {
            // redirection can make invokevirtual legal on a static target
            Some(CodeEmitter::call(function))
        } else {
            match slot {
                Some(slot) => Some(CodeEmitter::call_virtual(slot)),
                None => Some(CodeEmitter::call(function)),
            }
        };
        let mut emit_construct = if is_ctor {
            Some(CodeEmitter::construct(function))
        } else {
            None
        };

        let ret = descriptor.ret_wrapper()?.clone();
        if ret.is_non_primitive_value_type() {
            let boxed = CodeEmitter::box_value(ret.host_type_or_object());
            emit_call = emit_call.map(|e| e.then(boxed.clone()));
            emit_call_virtual = emit_call_virtual.map(|e| e.then(boxed));
        }
        if declaring.is_non_primitive_value_type() {
            if is_ctor {
                let boxed = CodeEmitter::box_value(declaring.host_type_or_object());
                emit_construct = emit_construct.map(|e| e.then(boxed));
            } else {
                // virtual dispatch is not possible on a value type
                emit_call_virtual = emit_call.clone();
            }
        }

        Ok(Arc::new(MethodWrapper {
            declaring: Arc::downgrade(declaring),
            descriptor,
            modifiers,
            function: Some(function),
            redirect: None,
            emit_call,
            emit_call_virtual,
            emit_construct,
            remapped_override: false,
            remapped_virtual: false,
        }))
    }

    /// Fully specified wrapper; used for remapped members and synthesized
    /// stubs where the standard strategies do not apply.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        declaring: &Arc<TypeWrapper>,
        descriptor: MethodDescriptor,
        modifiers: Modifiers,
        function: Option<HostFunctionId>,
        redirect: Option<HostFunctionId>,
        emit_call: Option<CodeEmitter>,
        emit_call_virtual: Option<CodeEmitter>,
        emit_construct: Option<CodeEmitter>,
        remapped_override: bool,
        remapped_virtual: bool,
    ) -> Arc<MethodWrapper> {
        Arc::new(MethodWrapper {
            declaring: Arc::downgrade(declaring),
            descriptor,
            modifiers,
            function,
            redirect,
            emit_call,
            emit_call_virtual,
            emit_construct,
            remapped_override,
            remapped_virtual,
        })
    }

    /// The declaring type wrapper.
    pub fn declaring_type(&self) -> Arc<TypeWrapper> {
        self.declaring
            .upgrade()
            .expect("declaring wrapper dropped while members are live")
    }

    /// Member descriptor.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Method name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Foreign flag word.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Static?
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Public?
    pub fn is_public(&self) -> bool {
        self.modifiers.is_public()
    }

    /// Private?
    pub fn is_private(&self) -> bool {
        self.modifiers.is_private()
    }

    /// Protected?
    pub fn is_protected(&self) -> bool {
        self.modifiers.is_protected()
    }

    /// Final?
    pub fn is_final(&self) -> bool {
        self.modifiers.is_final()
    }

    /// Abstract?
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract()
    }

    /// Replaces inherited host behavior (remapped types only).
    pub fn is_remapped_override(&self) -> bool {
        self.remapped_override
    }

    /// Foreign-virtual with no real host dispatch slot (remapped types
    /// only).
    pub fn is_remapped_virtual(&self) -> bool {
        self.remapped_virtual
    }

    /// The bound host executable, when there is one.
    pub fn host_function(&self) -> Option<HostFunctionId> {
        self.function
    }

    /// The redirect target, when the member is redirected.
    pub fn redirect_function(&self) -> Option<HostFunctionId> {
        self.redirect
    }

    /// Return type as a wrapper.
    pub fn return_type(&self) -> BridgeResult<Arc<TypeWrapper>> {
        Ok(self.descriptor.ret_wrapper()?.clone())
    }

    /// Parameter types as wrappers.
    pub fn parameters(&self) -> BridgeResult<Vec<Arc<TypeWrapper>>> {
        Ok(self.descriptor.arg_wrappers()?.to_vec())
    }

    /// Ordinary (non-dispatched) call strategy.
    pub fn emit_call(&self) -> Option<&CodeEmitter> {
        self.emit_call.as_ref()
    }

    /// Virtual call strategy.
    pub fn emit_call_virtual(&self) -> Option<&CodeEmitter> {
        self.emit_call_virtual.as_ref()
    }

    /// Construct strategy (constructors only).
    pub fn emit_construct(&self) -> Option<&CodeEmitter> {
        self.emit_construct.as_ref()
    }

    /// The dispatch slot of the bound host function, if it has one.
    pub fn dispatch_slot(&self) -> Option<SlotId> {
        let function = self.function?;
        let loader = self.declaring_type().loader();
        let engine = loader.engine();
        let record = engine.function(function);
        engine.with_type(record.owner, |t| {
            t.methods
                .iter()
                .find(|m| m.function == function)
                .and_then(|m| m.slot)
        })
    }

    fn check_arg_shapes(&self, args: &[HostValue]) -> BridgeResult<()> {
        let params = self.descriptor.arg_wrappers()?;
        if params.len() != args.len() {
            return Err(BridgeError::ArgumentShapeMismatch(format!(
                "{} expects {} arguments, got {}",
                self.name(),
                params.len(),
                args.len()
            )));
        }
        for (i, (param, value)) in params.iter().zip(args).enumerate() {
            if param.is_unloadable() || param.is_verifier() {
                continue;
            }
            if !shape_matches(param, value) {
                return Err(BridgeError::ArgumentShapeMismatch(format!(
                    "{} argument {} has the wrong shape",
                    self.name(),
                    i
                )));
            }
        }
        Ok(())
    }

    fn ret_instr(&self) -> Instr {
        if self.descriptor.returns_void() {
            Instr::Return
        } else {
            Instr::ReturnValue
        }
    }

    /// Reflective invocation.
    ///
    /// `receiver` is `None` for statics and for constructor invocation
    /// (which allocates a fresh instance). Errors thrown by the invoked
    /// code are re-wrapped as invocation failures with the cause
    /// preserved; argument-shape problems surface directly.
    pub fn invoke(
        &self,
        receiver: Option<HostValue>,
        args: &[HostValue],
        nonvirtual: bool,
    ) -> BridgeResult<HostValue> {
        self.check_arg_shapes(args)?;
        let declaring = self.declaring_type();
        let loader = declaring.loader();
        let engine = loader.engine();
        let argc = args.len() as u16;

        if self.name() == "<init>" {
            if receiver.is_some() {
                return Err(BridgeError::IllegalState(
                    "constructor invocation on an existing instance".into(),
                ));
            }
            let construct = self.emit_construct.as_ref().ok_or_else(|| {
                BridgeError::IllegalState(format!("{} is not constructible", declaring.name()))
            })?;
            let mut body = MethodBody::new();
            body.push_args(argc);
            construct.emit(&mut body);
            body.push(Instr::ReturnValue);
            return engine
                .run_thunk(&body, args)
                .map_err(BridgeError::invocation);
        }

        if self.is_static() {
            let call = self
                .emit_call
                .as_ref()
                .ok_or_else(|| BridgeError::IllegalState(format!("{} is not callable", self.name())))?;
            let mut body = MethodBody::new();
            body.push_args(argc);
            call.emit(&mut body);
            body.push(self.ret_instr());
            return engine
                .run_thunk(&body, args)
                .map_err(BridgeError::invocation);
        }

        let receiver = receiver.ok_or(BridgeError::NullReference)?;
        let emitter = if nonvirtual {
            self.emit_call.as_ref()
        } else {
            self.emit_call_virtual.as_ref().or(self.emit_call.as_ref())
        }
        .ok_or_else(|| BridgeError::IllegalState(format!("{} is not callable", self.name())))?;
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(receiver);
        full_args.extend_from_slice(args);
        let mut body = MethodBody::new();
        body.push_args(argc + 1);
        emitter.emit(&mut body);
        body.push(self.ret_instr());
        engine
            .run_thunk(&body, &full_args)
            .map_err(BridgeError::invocation)
    }
}

impl std::fmt::Debug for MethodWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodWrapper[{:?}]", self.descriptor)
    }
}

/// Runtime handle for one foreign field
pub struct FieldWrapper {
    declaring: Weak<TypeWrapper>,
    name: String,
    signature: String,
    modifiers: Modifiers,
    field: Option<(HostTypeId, u16)>,
    emit_get: Option<CodeEmitter>,
    emit_set: Option<CodeEmitter>,
}

impl FieldWrapper {
    /// Wrapper over a declared host field with the standard access
    /// strategies: volatile 64-bit accesses go through the monitor-held
    /// forms, value-type field values are shape-converted around the
    /// access.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        declaring: &Arc<TypeWrapper>,
        name: impl Into<String>,
        signature: impl Into<String>,
        modifiers: Modifiers,
        owner: HostTypeId,
        index: u16,
    ) -> BridgeResult<Arc<FieldWrapper>> {
        let name = name.into();
        let signature = signature.into();
        let loader = declaring.loader();
        let field_type = loader.wrapper_from_field_sig(&signature)?;

        let wide = matches!(
            field_type.primitive_kind(),
            Some(PrimitiveKind::Long) | Some(PrimitiveKind::Double)
        );
        let (mut get, mut set) = if modifiers.is_static() {
            (
                CodeEmitter::get_static(owner, index),
                CodeEmitter::put_static(owner, index),
            )
        } else if modifiers.is_volatile() && wide {
            // 64-bit volatile accesses must be atomic; these forms hold
            // the receiver monitor
            (
                CodeEmitter::instr(Instr::GetFieldVolatile { owner, index }),
                CodeEmitter::instr(Instr::PutFieldVolatile { owner, index }),
            )
        } else {
            (
                CodeEmitter::get_field(owner, index),
                CodeEmitter::put_field(owner, index),
            )
        };
        if field_type.is_non_primitive_value_type() {
            let host = field_type.host_type_or_object();
            set = CodeEmitter::unbox_value(host).then(set);
            get = get.then(CodeEmitter::box_value(host));
        }

        Ok(Arc::new(FieldWrapper {
            declaring: Arc::downgrade(declaring),
            name,
            signature,
            modifiers,
            field: Some((owner, index)),
            emit_get: Some(get),
            emit_set: Some(set),
        }))
    }

    /// Fully specified wrapper; used for literal constants, read-only
    /// accessors, and remapped field redirects.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        declaring: &Arc<TypeWrapper>,
        name: impl Into<String>,
        signature: impl Into<String>,
        modifiers: Modifiers,
        field: Option<(HostTypeId, u16)>,
        emit_get: Option<CodeEmitter>,
        emit_set: Option<CodeEmitter>,
    ) -> Arc<FieldWrapper> {
        Arc::new(FieldWrapper {
            declaring: Arc::downgrade(declaring),
            name: name.into(),
            signature: signature.into(),
            modifiers,
            field,
            emit_get,
            emit_set,
        })
    }

    /// The declaring type wrapper.
    pub fn declaring_type(&self) -> Arc<TypeWrapper> {
        self.declaring
            .upgrade()
            .expect("declaring wrapper dropped while members are live")
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field type signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Foreign flag word.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Static?
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Final?
    pub fn is_final(&self) -> bool {
        self.modifiers.is_final()
    }

    /// Volatile?
    pub fn is_volatile(&self) -> bool {
        self.modifiers.is_volatile()
    }

    /// Declared host field coordinates, when bound to real storage.
    pub fn host_field(&self) -> Option<(HostTypeId, u16)> {
        self.field
    }

    /// Field type as a wrapper.
    pub fn field_type(&self) -> BridgeResult<Arc<TypeWrapper>> {
        self.declaring_type()
            .loader()
            .wrapper_from_field_sig(&self.signature)
    }

    /// Read strategy.
    pub fn emit_get(&self) -> Option<&CodeEmitter> {
        self.emit_get.as_ref()
    }

    /// Write strategy. Absent when no real store exists (read-only
    /// accessor fields resolved from outside their declaring unit).
    pub fn emit_set(&self) -> Option<&CodeEmitter> {
        self.emit_set.as_ref()
    }

    /// Reflective read through the get strategy.
    pub fn get_value(&self, receiver: Option<HostValue>) -> BridgeResult<HostValue> {
        let get = self
            .emit_get
            .as_ref()
            .ok_or_else(|| BridgeError::IllegalState(format!("{} is not readable", self.name)))?;
        let loader = self.declaring_type().loader();
        let engine = loader.engine();
        let mut body = MethodBody::new();
        let args: Vec<HostValue> = if self.is_static() {
            Vec::new()
        } else {
            body.push(Instr::LoadArg(0));
            vec![receiver.ok_or(BridgeError::NullReference)?]
        };
        get.emit(&mut body);
        body.push(Instr::ReturnValue);
        engine
            .run_thunk(&body, &args)
            .map_err(BridgeError::invocation)
    }

    /// Reflective write through the set strategy. Writing through the
    /// strategy of an inlined constant discards the value, matching
    /// foreign semantics for assignments to inlined constants.
    pub fn set_value(&self, receiver: Option<HostValue>, value: HostValue) -> BridgeResult<()> {
        let set = self.emit_set.as_ref().ok_or_else(|| {
            BridgeError::IllegalAccess(format!("field {} has no accessible store", self.name))
        })?;
        let loader = self.declaring_type().loader();
        let engine = loader.engine();
        let mut body = MethodBody::new();
        let args: Vec<HostValue> = if self.is_static() {
            body.push(Instr::LoadArg(0));
            vec![value]
        } else {
            body.push(Instr::LoadArg(0));
            body.push(Instr::LoadArg(1));
            vec![receiver.ok_or(BridgeError::NullReference)?, value]
        };
        set.emit(&mut body);
        body.push(Instr::Return);
        engine
            .run_thunk(&body, &args)
            .map(|_| ())
            .map_err(BridgeError::invocation)
    }
}

impl std::fmt::Debug for FieldWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FieldWrapper[{} {}]", self.name, self.signature)
    }
}
