//! Dynamically defined wrappers and the type emission engine
//!
//! A dynamic wrapper is backed by freshly parsed foreign class data and
//! owns the two-phase emission engine: the host type shell is declared at
//! construction, members are generated lazily or during finishing, and a
//! single `finish` transition produces the executable host type.
//!
//! The engine state is an explicit tagged machine, Declared → Finishing →
//! Finished, behind a re-entrant lock: concurrent finishes serialize per
//! wrapper, a re-entrant call on the finishing thread observes the
//! in-progress tag and returns, and everyone converges on one finished
//! record.

use std::cell::RefCell;
use std::sync::Arc;

use ferrule_classfile::{
    inner_class_simple_name, ret_sig_of, ClassData, ConstantValue, FieldData, MethodData,
    Modifiers,
};
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::descriptor::MethodDescriptor;
use crate::emit::CodeEmitter;
use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody, ThrowKind};
use crate::host::builder::HostTypeBuilder;
use crate::host::engine::{FnSig, FunctionBody, NativeKey};
use crate::host::ty::{field_visibility, method_visibility, MethodAttribs, TypeAttribs};
use crate::host::value::{HostFunctionId, HostValue};
use crate::loader::LoaderContext;
use crate::member::{FieldWrapper, MethodWrapper};
use crate::wrapper::{remapped, stubs, TypeWrapper, WrapperKind};

struct DeclaredMembers {
    fields: Vec<Option<Arc<FieldWrapper>>>,
    field_index: FxHashMap<String, usize>,
    methods: Vec<Option<Arc<MethodWrapper>>>,
    method_index: FxHashMap<(String, String), usize>,
}

enum EmissionState {
    Declared(Box<DeclaredMembers>),
    Finishing,
    Finished,
}

struct FinishedType {
    inner: Vec<Arc<TypeWrapper>>,
    enclosing: Option<Arc<TypeWrapper>>,
}

pub(crate) struct DynamicData {
    pub(crate) class: Arc<ClassData>,
    pub(crate) interfaces: Vec<Arc<TypeWrapper>>,
    outer: Option<Arc<TypeWrapper>>,
    pub(crate) host: crate::host::value::HostTypeId,
    state: ReentrantMutex<RefCell<EmissionState>>,
    finished: OnceCell<FinishedType>,
}

impl DynamicData {
    pub(crate) fn inner_classes(&self, wrapper: &Arc<TypeWrapper>) -> Vec<Arc<TypeWrapper>> {
        if let Some(finished) = self.finished.get() {
            return finished.inner.clone();
        }
        let loader = wrapper.loader();
        self.class
            .nested_class_names()
            .into_iter()
            .filter_map(|name| loader.resolve_class(name).ok())
            .filter(|w| !w.is_unloadable())
            .collect()
    }

    pub(crate) fn declaring_type(&self, wrapper: &Arc<TypeWrapper>) -> Option<Arc<TypeWrapper>> {
        if let Some(finished) = self.finished.get() {
            return finished.enclosing.clone();
        }
        let loader = wrapper.loader();
        let rel = self.class.outer_class()?;
        loader
            .resolve_class(&rel.outer)
            .ok()
            .filter(|w| !w.is_unloadable())
    }
}

fn constant_to_value(sig: &str, constant: &ConstantValue) -> HostValue {
    match (sig.as_bytes().first(), constant) {
        (Some(b'Z'), ConstantValue::Int(v)) => HostValue::Bool(*v != 0),
        (Some(b'B'), ConstantValue::Int(v)) => HostValue::Byte(*v as i8),
        (Some(b'C'), ConstantValue::Int(v)) => HostValue::Char(*v as u16),
        (Some(b'S'), ConstantValue::Int(v)) => HostValue::Short(*v as i16),
        (_, ConstantValue::Int(v)) => HostValue::Int(*v),
        (_, ConstantValue::Long(v)) => HostValue::Long(*v),
        (_, ConstantValue::Float(v)) => HostValue::Float(*v),
        (_, ConstantValue::Double(v)) => HostValue::Double(*v),
        (_, ConstantValue::Str(v)) => HostValue::str(v),
    }
}

/// Validate a class declaration and declare its host type shell.
///
/// Hierarchy problems (unloadable or final or non-interface super,
/// inaccessible super or interface, overriding a final method) surface
/// here as typed errors, before any emission starts.
pub(crate) fn define_class(
    loader: &Arc<LoaderContext>,
    class: Arc<ClassData>,
) -> BridgeResult<Arc<TypeWrapper>> {
    let engine = loader.engine();
    let is_interface = class.modifiers.is_interface();

    let super_name = class.super_name.as_deref().unwrap_or("java/lang/Object");
    let base = loader.resolve_class(super_name)?;
    if base.is_unloadable() {
        return Err(BridgeError::ClassNotResolvable(base.name().to_string()));
    }
    if !base.is_public() {
        let same_loader = Arc::ptr_eq(&base.loader(), loader);
        let same_package =
            ferrule_classfile::package_of(&class.name) == base.package_name();
        if !same_loader || !same_package {
            return Err(BridgeError::IllegalAccess(format!(
                "class {} cannot access its superclass {}",
                class.name,
                base.name()
            )));
        }
    }
    if base.is_final() {
        return Err(BridgeError::VerificationFailure(format!(
            "cannot inherit from final class {}",
            base.name()
        )));
    }
    if !is_interface && base.is_interface() {
        return Err(BridgeError::IncompatibleHierarchy(format!(
            "class {} has interface {} as superclass",
            class.name,
            base.name()
        )));
    }

    let mut interfaces = Vec::with_capacity(class.interfaces.len());
    for iface_name in &class.interfaces {
        let iface = loader.resolve_class(iface_name)?;
        if iface.is_unloadable() {
            return Err(BridgeError::ClassNotResolvable(iface.name().to_string()));
        }
        if !iface.is_interface() {
            return Err(BridgeError::IncompatibleHierarchy(format!(
                "{} implements non-interface {}",
                class.name,
                iface.name()
            )));
        }
        if !iface.is_public() {
            let same_loader = Arc::ptr_eq(&iface.loader(), loader);
            let same_package =
                ferrule_classfile::package_of(&class.name) == iface.package_name();
            if !same_loader || !same_package {
                return Err(BridgeError::IllegalAccess(format!(
                    "class {} cannot access its superinterface {}",
                    class.name,
                    iface.name()
                )));
            }
        }
        interfaces.push(iface);
    }

    validate_overrides(loader, &class, &base)?;

    let mut outer = None;
    if loader.options().aot_nesting {
        if let Some(rel) = class.outer_class() {
            inner_class_simple_name(&rel.outer, &class.name).map_err(|e| {
                BridgeError::IllegalState(e.to_string())
            })?;
            let outer_wrapper = loader.resolve_class(&rel.outer)?;
            if !outer_wrapper.is_unloadable() {
                outer = Some(outer_wrapper);
            }
        }
    }

    let mut attribs = TypeAttribs::empty();
    if class.modifiers.is_public() {
        attribs |= TypeAttribs::PUBLIC;
    }
    if class.modifiers.is_abstract() {
        attribs |= TypeAttribs::ABSTRACT;
    }
    if class.modifiers.is_final() {
        attribs |= TypeAttribs::SEALED;
    }
    if is_interface {
        attribs |= TypeAttribs::INTERFACE | TypeAttribs::ABSTRACT;
    }
    let host_base = if is_interface {
        None
    } else {
        Some(base.host_type()?)
    };
    let mut iface_ids = Vec::with_capacity(interfaces.len());
    for iface in &interfaces {
        iface_ids.push(iface.host_type()?);
    }
    let enclosing = match &outer {
        Some(o) => Some(o.host_type()?),
        None => None,
    };
    let builder = HostTypeBuilder::declare(
        engine,
        class.name.replace('/', "."),
        attribs,
        loader.unit(),
        host_base,
        iface_ids,
        enclosing,
        Some(class.modifiers),
    );

    let members = DeclaredMembers {
        fields: vec![None; class.fields.len()],
        field_index: class
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect(),
        methods: vec![None; class.methods.len()],
        method_index: class
            .methods
            .iter()
            .enumerate()
            .map(|(i, m)| ((m.name.clone(), m.signature.clone()), i))
            .collect(),
    };
    Ok(TypeWrapper::new(
        loader,
        class.name.clone(),
        class.modifiers,
        Some(base),
        WrapperKind::Dynamic(DynamicData {
            class,
            interfaces,
            outer,
            host: builder.id(),
            state: ReentrantMutex::new(RefCell::new(EmissionState::Declared(Box::new(members)))),
            finished: OnceCell::new(),
        }),
    ))
}

/// A declared method may not replace a final method anywhere up the base
/// chain.
fn validate_overrides(
    loader: &Arc<LoaderContext>,
    class: &ClassData,
    base: &Arc<TypeWrapper>,
) -> BridgeResult<()> {
    if class.modifiers.is_interface() {
        return Ok(());
    }
    for m in &class.methods {
        if m.is_constructor() || m.is_class_initializer() {
            continue;
        }
        if m.modifiers.is_private() || m.modifiers.is_static() {
            continue;
        }
        let md = MethodDescriptor::new(loader, m.name.clone(), m.signature.clone());
        let mut current = Some(base.clone());
        while let Some(tw) = current {
            let Some(found) = tw.get_method_wrapper(&md, true)? else {
                break;
            };
            if found.is_final() {
                return Err(BridgeError::VerificationFailure(format!(
                    "final method {}{} in {} is overridden in {}",
                    found.name(),
                    found.descriptor().signature(),
                    found.declaring_type().name(),
                    class.name
                )));
            }
            if found.is_public() || found.is_protected() {
                break;
            }
            current = found.declaring_type().base_wrapper().cloned();
        }
    }
    Ok(())
}

/// Lazy per-member resolution (pre-finish only; during and after
/// finishing every member is already registered on the wrapper).
pub(crate) fn resolve_method(
    wrapper: &Arc<TypeWrapper>,
    data: &DynamicData,
    md: &MethodDescriptor,
) -> BridgeResult<Option<Arc<MethodWrapper>>> {
    let guard = data.state.lock();
    let pending = {
        let state = guard.borrow();
        match &*state {
            EmissionState::Declared(members) => {
                match members
                    .method_index
                    .get(&(md.name().to_string(), md.signature().to_string()))
                {
                    Some(&idx) => match &members.methods[idx] {
                        Some(existing) => return Ok(Some(existing.clone())),
                        None => Some(idx),
                    },
                    None => None,
                }
            }
            _ => None,
        }
    };
    let Some(idx) = pending else {
        return Ok(None);
    };
    let method = generate_method(wrapper, data, &data.class.methods[idx].clone())?;
    if let EmissionState::Declared(members) = &mut *guard.borrow_mut() {
        members.methods[idx] = Some(method.clone());
    }
    Ok(Some(method))
}

pub(crate) fn resolve_field(
    wrapper: &Arc<TypeWrapper>,
    data: &DynamicData,
    name: &str,
) -> BridgeResult<Option<Arc<FieldWrapper>>> {
    let guard = data.state.lock();
    let pending = {
        let state = guard.borrow();
        match &*state {
            EmissionState::Declared(members) => match members.field_index.get(name) {
                Some(&idx) => match &members.fields[idx] {
                    Some(existing) => return Ok(Some(existing.clone())),
                    None => Some(idx),
                },
                None => None,
            },
            _ => None,
        }
    };
    let Some(idx) = pending else {
        return Ok(None);
    };
    let field = generate_field(wrapper, data, &data.class.fields[idx].clone())?;
    if let EmissionState::Declared(members) = &mut *guard.borrow_mut() {
        members.fields[idx] = Some(field.clone());
    }
    Ok(Some(field))
}

fn generate_field(
    wrapper: &Arc<TypeWrapper>,
    data: &DynamicData,
    fld: &FieldData,
) -> BridgeResult<Arc<FieldWrapper>> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let builder = HostTypeBuilder::reopen(engine, data.host);
    let field_type = loader.wrapper_from_field_sig(&fld.signature)?;
    let (host_ty, foreign_note) = if field_type.is_unloadable() {
        (engine.object_type(), Some(field_type.name().to_string()))
    } else {
        (field_type.host_type_or_object(), None)
    };

    let mut attribs = field_visibility(fld.modifiers);
    let mut record_modifiers = false;
    if fld.modifiers.is_static() {
        attribs |= crate::host::ty::FieldAttribs::STATIC;
    }

    // constant static finals become host literals: reads inline the
    // constant, writes are discarded (assignment to an inlined constant
    // has no effect in the foreign model either)
    if fld.modifiers.is_static() && fld.modifiers.is_final() {
        if let Some(constant) = &fld.constant {
            let literal = constant_to_value(&fld.signature, constant);
            attribs |= crate::host::ty::FieldAttribs::LITERAL;
            builder.define_field(
                fld.name.clone(),
                host_ty,
                attribs,
                Some(literal.clone()),
                Some(fld.modifiers),
                foreign_note,
            );
            return Ok(FieldWrapper::with_parts(
                wrapper,
                fld.name.clone(),
                fld.signature.clone(),
                fld.modifiers,
                None,
                Some(CodeEmitter::load_const(literal)),
                Some(CodeEmitter::pop()),
            ));
        }
    }

    let blank_final =
        fld.modifiers.is_final() && !fld.modifiers.is_private() && !wrapper.is_interface();
    if blank_final {
        // blank finals get a private backing store and a synthesized
        // read-only accessor
        attribs -= crate::host::ty::FieldAttribs::PUBLIC
            | crate::host::ty::FieldAttribs::PROTECTED
            | crate::host::ty::FieldAttribs::ASSEMBLY;
        attribs |= crate::host::ty::FieldAttribs::PRIVATE;
        record_modifiers = true;
    }
    if fld.modifiers.is_volatile() {
        attribs |= crate::host::ty::FieldAttribs::VOLATILE;
        record_modifiers = true;
    }
    if fld.modifiers.is_transient() {
        attribs |= crate::host::ty::FieldAttribs::TRANSIENT;
    }
    let index = builder.define_field(
        fld.name.clone(),
        host_ty,
        attribs,
        None,
        (record_modifiers || foreign_note.is_some()).then_some(fld.modifiers),
        foreign_note,
    );

    if blank_final {
        let mut getter_attribs = method_visibility(fld.modifiers) | MethodAttribs::SPECIAL_NAME;
        if fld.modifiers.is_static() {
            getter_attribs |= MethodAttribs::STATIC;
        }
        let (getter, _) = builder.define_method(
            format!("get_{}", fld.name),
            FnSig {
                params: Vec::new(),
                ret: Some(host_ty),
                is_static: fld.modifiers.is_static(),
            },
            getter_attribs,
            None,
            None,
            Some(Modifiers::SYNTHETIC),
        );
        let mut body = MethodBody::new();
        if fld.modifiers.is_static() {
            body.push(Instr::GetStatic {
                owner: data.host,
                index,
            });
        } else {
            body.push(Instr::LoadArg(0));
            body.push(Instr::GetField {
                owner: data.host,
                index,
            });
        }
        body.push(Instr::ReturnValue);
        engine.set_function_body(getter, FunctionBody::Emitted(Arc::new(body)));

        let store = if fld.modifiers.is_static() {
            CodeEmitter::put_static(data.host, index)
        } else {
            CodeEmitter::put_field(data.host, index)
        };
        return Ok(FieldWrapper::with_parts(
            wrapper,
            fld.name.clone(),
            fld.signature.clone(),
            fld.modifiers,
            Some((data.host, index)),
            Some(CodeEmitter::call(getter)),
            // the raw store remains reachable for the declaring class's
            // own initialization code
            Some(store),
        ));
    }

    FieldWrapper::create(
        wrapper,
        fld.name.clone(),
        fld.signature.clone(),
        fld.modifiers,
        data.host,
        index,
    )
}

fn generate_method(
    wrapper: &Arc<TypeWrapper>,
    data: &DynamicData,
    m: &MethodData,
) -> BridgeResult<Arc<MethodWrapper>> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let builder = HostTypeBuilder::reopen(engine, data.host);
    let class = &data.class;
    let md = MethodDescriptor::new(&loader, m.name.clone(), m.signature.clone());
    let params = md.arg_types()?.to_vec();
    let ret_wrapper = md.ret_wrapper()?.clone();
    let ret = if md.returns_void() {
        None
    } else {
        Some(ret_wrapper.host_type_or_object())
    };

    let mut attribs = method_visibility(m.modifiers);
    let mut record_modifiers = false;
    if m.modifiers.is_abstract() {
        // only abstract-in-an-abstract-class maps to a host abstract
        // method; a concrete class gets a throwing body instead, because
        // the host forbids callable abstract slots
        if class.modifiers.is_abstract() || class.modifiers.is_interface() {
            attribs |= MethodAttribs::ABSTRACT;
        } else {
            record_modifiers = true;
        }
    }
    if m.modifiers.is_final() {
        if !m.modifiers.is_static() && !m.modifiers.is_private() {
            attribs |= MethodAttribs::FINAL;
        } else {
            record_modifiers = true;
        }
    }
    if m.modifiers.is_static() {
        attribs |= MethodAttribs::STATIC;
    }
    if m.modifiers.is_synchronized() && !m.is_constructor() && !m.is_class_initializer() {
        attribs |= MethodAttribs::SYNCHRONIZED;
    }

    let native_key = m.modifiers.is_native().then(|| NativeKey {
        class: class.name.clone(),
        name: m.name.clone(),
        sig: m.signature.clone(),
    });

    if m.is_constructor() {
        let (function, _) = builder.define_method(
            m.name.clone(),
            FnSig {
                params,
                ret: None,
                is_static: false,
            },
            attribs,
            None,
            native_key,
            None,
        );
        return MethodWrapper::create(wrapper, md, function, m.modifiers);
    }
    if m.is_class_initializer() {
        let mut attribs = attribs | MethodAttribs::STATIC;
        if class.modifiers.is_interface() {
            // host verification requires interface initializers public
            attribs -= MethodAttribs::PRIVATE | MethodAttribs::PROTECTED | MethodAttribs::ASSEMBLY;
            attribs |= MethodAttribs::PUBLIC;
        }
        let (function, _) = builder.define_method(
            m.name.clone(),
            FnSig {
                params: Vec::new(),
                ret: None,
                is_static: true,
            },
            attribs,
            None,
            native_key,
            None,
        );
        builder.set_clinit(function);
        return MethodWrapper::create(wrapper, md, function, m.modifiers);
    }

    if !m.modifiers.is_private() && !m.modifiers.is_static() {
        attribs |= MethodAttribs::VIRTUAL;
    }

    // locate the method this one overrides, applying the foreign rules in
    // order up the base chain
    let mut base_method: Option<Arc<MethodWrapper>> = None;
    let mut explicit_override = false;
    if attribs.contains(MethodAttribs::VIRTUAL) && !class.modifiers.is_interface() {
        let mut current = wrapper.base_wrapper().cloned();
        while let Some(tw) = current {
            let Some(candidate) = tw.get_method_wrapper(&md, true)? else {
                break;
            };
            // RULE 1: final methods may not be overridden
            if candidate.is_final() {
                return Err(BridgeError::VerificationFailure(format!(
                    "final method {}{} in {} is overridden in {}",
                    candidate.name(),
                    candidate.descriptor().signature(),
                    candidate.declaring_type().name(),
                    class.name
                )));
            }
            // RULE 2: public and protected methods are overridable
            if candidate.is_public() || candidate.is_protected() {
                if explicit_override {
                    // a nearer package-private method shadows this one;
                    // we cannot override past it
                    break;
                }
                // the host forbids narrowing access on an override
                if !attribs.contains(MethodAttribs::PUBLIC) {
                    attribs -= MethodAttribs::PRIVATE
                        | MethodAttribs::PROTECTED
                        | MethodAttribs::ASSEMBLY;
                    attribs |= if candidate.is_public() {
                        MethodAttribs::PUBLIC
                    } else {
                        MethodAttribs::PROTECTED
                    };
                    record_modifiers = true;
                }
                base_method = Some(candidate);
                break;
            }
            // RULE 3: private methods are ignored
            if !candidate.is_private() {
                // RULE 4: package methods are overridable only from the
                // same package; otherwise the override binding must be
                // explicit so dispatch stays unambiguous
                if candidate.declaring_type().is_in_same_package_as(wrapper) {
                    base_method = Some(candidate);
                    break;
                }
                explicit_override = true;
            }
            current = candidate.declaring_type().base_wrapper().cloned();
        }
        if base_method.is_none() {
            // a fresh slot, so a same-named host method further up can
            // never be overridden by accident
            attribs |= MethodAttribs::NEW_SLOT;
        }
    }

    let override_slot = base_method.as_ref().and_then(|b| b.dispatch_slot());
    let (function, _) = builder.define_method(
        m.name.clone(),
        FnSig {
            params,
            ret,
            is_static: m.modifiers.is_static(),
        },
        attribs,
        override_slot,
        native_key,
        record_modifiers.then_some(m.modifiers),
    );

    // a public method overriding a non-public one may also satisfy
    // interface slots currently served by illegal-access stubs
    if let Some(base_mce) = &base_method {
        if !base_mce.is_public() && m.modifiers.is_public() {
            let stop = base_mce.declaring_type();
            let mut visited = FxHashSet::default();
            let mut tw = wrapper.base_wrapper().cloned();
            while let Some(t) = tw {
                if std::ptr::eq(Arc::as_ptr(&t), Arc::as_ptr(&stop)) {
                    break;
                }
                for iface in t.interfaces() {
                    bind_interface_slot(&builder, &iface, &md, function, &mut visited)?;
                }
                tw = t.base_wrapper().cloned();
            }
        }
    }

    MethodWrapper::create(wrapper, md, function, m.modifiers)
}

fn bind_interface_slot(
    builder: &HostTypeBuilder,
    iface: &Arc<TypeWrapper>,
    md: &MethodDescriptor,
    function: HostFunctionId,
    visited: &mut FxHashSet<*const TypeWrapper>,
) -> BridgeResult<()> {
    if !visited.insert(Arc::as_ptr(iface)) {
        return Ok(());
    }
    if let Some(mw) = iface.get_method_wrapper(md, false)? {
        if let Some(slot) = mw.dispatch_slot() {
            builder.define_explicit_override(slot, function);
        }
    }
    for sub in iface.interfaces() {
        bind_interface_slot(builder, &sub, md, function, visited)?;
    }
    Ok(())
}

/// The one-time finish transition (spec steps 1–8).
pub(crate) fn finish(wrapper: &Arc<TypeWrapper>) -> BridgeResult<()> {
    let WrapperKind::Dynamic(data) = &wrapper.kind else {
        unreachable!("dynamic finish on non-dynamic wrapper");
    };
    if data.finished.get().is_some() {
        return Ok(());
    }
    let guard = data.state.lock();
    {
        let state = guard.borrow();
        match &*state {
            // re-entered by the finishing thread, or completed while we
            // waited for the lock
            EmissionState::Finishing | EmissionState::Finished => return Ok(()),
            EmissionState::Declared(_) => {}
        }
    }

    // base and enclosing types finish first: any stub members they
    // synthesize must exist before our overrides are resolved
    if let Some(base) = wrapper.base_wrapper() {
        base.finish()?;
    }
    if let Some(outer) = &data.outer {
        outer.finish()?;
    }
    // force-resolve everything referenced in signatures; re-entrant
    // finishing triggered mid-generation would be unrecoverable
    let loader = wrapper.loader();
    for name in data.class.referenced_classes() {
        loader.resolve_class(&name)?;
    }
    // resolution may have finished us re-entrantly
    if data.finished.get().is_some() {
        return Ok(());
    }

    let members = {
        let mut state = guard.borrow_mut();
        match std::mem::replace(&mut *state, EmissionState::Finishing) {
            EmissionState::Declared(members) => members,
            other => {
                *state = other;
                return Ok(());
            }
        }
    };

    match run_finish(wrapper, data, *members) {
        Ok(finished) => {
            let _ = data.finished.set(finished);
            *guard.borrow_mut() = EmissionState::Finished;
            Ok(())
        }
        Err(err) => fatal_finish_error(wrapper.name(), err),
    }
}

/// The engine is mid-mutation on shared host metadata; there is no safe
/// rollback, so the process terminates.
fn fatal_finish_error(name: &str, err: BridgeError) -> ! {
    eprintln!("fatal error while finishing {name}: {err}");
    std::process::exit(1);
}

fn run_finish(
    wrapper: &Arc<TypeWrapper>,
    data: &DynamicData,
    mut members: DeclaredMembers,
) -> BridgeResult<FinishedType> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let builder = HostTypeBuilder::reopen(engine, data.host);
    let class = &data.class;
    let is_interface = class.modifiers.is_interface();

    // generate every remaining member and register all of them
    for i in 0..class.fields.len() {
        if members.fields[i].is_none() {
            members.fields[i] = Some(generate_field(wrapper, data, &class.fields[i])?);
        }
        wrapper.add_field(members.fields[i].clone().expect("field generated"));
    }
    for i in 0..class.methods.len() {
        if members.methods[i].is_none() {
            members.methods[i] = Some(generate_method(wrapper, data, &class.methods[i])?);
        }
        wrapper.add_method(members.methods[i].clone().expect("method generated"));
    }

    // a concrete type may not inherit callable abstract slots: re-stub
    // any abstract ancestor method with no concrete override here
    if !wrapper.is_abstract() && !is_interface {
        let mut parent = wrapper.base_wrapper().cloned();
        while let Some(p) = parent {
            if !p.is_abstract() {
                break;
            }
            for method in p.get_methods() {
                if !method.is_abstract() || method.is_static() {
                    continue;
                }
                let md = method.descriptor().clone();
                let still_abstract = wrapper
                    .get_method_wrapper(&md, true)?
                    .map(|m| m.is_abstract())
                    .unwrap_or(false);
                if !still_abstract {
                    continue;
                }
                let params = md.arg_types()?.to_vec();
                let ret = if md.returns_void() {
                    None
                } else {
                    Some(md.ret_wrapper()?.host_type_or_object())
                };
                let (stub, _) = builder.define_method(
                    md.name().to_string(),
                    FnSig {
                        params,
                        ret,
                        is_static: false,
                    },
                    MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
                    method.dispatch_slot(),
                    None,
                    Some(method.modifiers()),
                );
                let detail = format!("{}.{}{}", wrapper.name(), md.name(), md.signature());
                engine.set_function_body(
                    stub,
                    FunctionBody::Emitted(Arc::new(MethodBody {
                        code: vec![Instr::Throw(ThrowKind::AbstractMethod, detail)],
                    })),
                );
            }
            parent = p.base_wrapper().cloned();
        }
    }

    // method bodies
    let base_clinit = match wrapper.base_wrapper() {
        Some(base) if !is_interface => {
            let base_host = base.host_type()?;
            engine
                .with_type(base_host, |t| t.clinit)
                .map(|_| base_host)
        }
        _ => None,
    };
    let mut has_clinit = false;
    for (i, m) in class.methods.iter().enumerate() {
        let mw = members.methods[i].as_ref().expect("method generated");
        let Some(function) = mw.host_function() else {
            continue;
        };
        if m.modifiers.is_abstract() {
            if !class.modifiers.is_abstract() && !is_interface {
                // abstract in a concrete-in-foreign-terms class: callable,
                // but it must throw
                let detail = format!("{}.{}{}", class.name, m.name, m.signature);
                engine.set_function_body(
                    function,
                    FunctionBody::Emitted(Arc::new(MethodBody {
                        code: vec![Instr::Throw(ThrowKind::AbstractMethod, detail)],
                    })),
                );
            }
            continue;
        }
        if m.modifiers.is_native() {
            emit_native_body(&loader, class, m, function)?;
            continue;
        }
        let mut body = MethodBody::new();
        if m.is_class_initializer() {
            has_clinit = true;
            if let Some(base_host) = base_clinit {
                // foreign semantics chain the base initializer; the host
                // does not do it across the bridge
                body.push(Instr::RunClassInit(base_host));
            }
        }
        loader
            .body_compiler()
            .compile(wrapper, m, &mut body, &loader)?;
        engine.set_function_body(function, FunctionBody::Emitted(Arc::new(body)));
    }

    // no declared initializer but the base has one: synthesize the chain
    if base_clinit.is_some() && !has_clinit && !is_interface {
        let (clinit, _) = builder.define_method(
            "<clinit>".to_string(),
            FnSig {
                params: Vec::new(),
                ret: None,
                is_static: true,
            },
            MethodAttribs::PRIVATE | MethodAttribs::STATIC,
            None,
            None,
            Some(Modifiers::SYNTHETIC),
        );
        let mut body = MethodBody::new();
        body.push(Instr::RunClassInit(base_clinit.expect("base clinit")));
        body.push(Instr::Return);
        engine.set_function_body(clinit, FunctionBody::Emitted(Arc::new(body)));
        builder.set_clinit(clinit);
    }

    // interface conformance stubs and the base's override/virtual hooks
    if !is_interface {
        let mut done = FxHashSet::default();
        for iface in &data.interfaces {
            stubs::implement_interface_stubs(iface, &builder, wrapper, &mut done)?;
        }
        if let Some(base) = wrapper.base_wrapper() {
            remapped::implement_override_stubs_and_virtuals(base, &builder, wrapper)?;
        }
    }

    builder.complete();
    loader.register_host_wrapper(data.host, wrapper.clone());
    Ok(FinishedType {
        inner: data.inner_classes(wrapper),
        enclosing: data.declaring_type(wrapper),
    })
}

fn emit_native_body(
    loader: &Arc<LoaderContext>,
    class: &ClassData,
    m: &MethodData,
    function: HostFunctionId,
) -> BridgeResult<()> {
    let engine = loader.engine();
    // 1. the supplied native-implementation table
    let key = format!("{}.{}{}", class.name.replace('/', "."), m.name, m.signature);
    if let Some(emitter) = loader.native_binding(&key) {
        let mut body = MethodBody::new();
        emitter.emit(&mut body);
        engine.set_function_body(function, FunctionBody::Emitted(Arc::new(body)));
        return Ok(());
    }
    // 2. a native-support class registered under the foreign class name
    if let Some(support) = loader.native_support_for(&class.name) {
        if let Some(native) = support.method(&m.name) {
            engine.set_function_body(function, FunctionBody::Native(native));
            return Ok(());
        }
    }
    // 3. with native stubs disabled, the method throws
    if loader.options().no_native_stubs {
        let detail = format!(
            "Native method not implemented: {}.{}{}",
            class.name, m.name, m.signature
        );
        engine.set_function_body(
            function,
            FunctionBody::Emitted(Arc::new(MethodBody {
                code: vec![Instr::Throw(ThrowKind::NativeMissing, detail)],
            })),
        );
        return Ok(());
    }
    // 4. a trampoline into the external native-call mechanism; the
    // binding resolves on first invocation and is cached per method
    engine.set_function_body(
        function,
        FunctionBody::Emitted(Arc::new(MethodBody {
            code: vec![Instr::NativeInvoke],
        })),
    );
    Ok(())
}

/// Return-shape sanity helper shared with remapping: does the signature's
/// return portion match?
pub(crate) fn ret_shapes_differ(md_sig: &str, target_sig: &str) -> bool {
    let ret = ret_sig_of(md_sig);
    ret != "V" && ret != ret_sig_of(target_sig)
}
