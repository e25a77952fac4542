//! Host-compiled wrappers
//!
//! A previously emitted, already-finished host type reflected back into a
//! wrapper. Member resolution is ahead-of-time against host metadata
//! rather than cached foreign class data; the recorded foreign flag words
//! are preferred when present, host attributes are decoded otherwise.

use std::sync::Arc;

use ferrule_classfile::Modifiers;
use once_cell::sync::OnceCell;

use crate::descriptor::MethodDescriptor;
use crate::emit::CodeEmitter;
use crate::error::BridgeResult;
use crate::host::ty::{FieldAttribs, MethodAttribs};
use crate::host::value::HostTypeId;
use crate::loader::LoaderContext;
use crate::member::{FieldWrapper, MethodWrapper};
use crate::wrapper::{TypeWrapper, WrapperKind};

pub(crate) struct CompiledData {
    pub(crate) host: HostTypeId,
    interfaces: OnceCell<Vec<Arc<TypeWrapper>>>,
    inner: OnceCell<Vec<Arc<TypeWrapper>>>,
}

pub(crate) fn new_compiled_wrapper(
    loader: &Arc<LoaderContext>,
    name: &str,
    host: HostTypeId,
    base: Option<Arc<TypeWrapper>>,
) -> Arc<TypeWrapper> {
    debug_assert!(!name.starts_with('['));
    let engine = loader.engine();
    let modifiers = engine
        .foreign_modifiers_of(host)
        .unwrap_or_else(|| derive_class_modifiers(loader, host));
    TypeWrapper::new(
        loader,
        name,
        modifiers,
        base,
        WrapperKind::Compiled(CompiledData {
            host,
            interfaces: OnceCell::new(),
            inner: OnceCell::new(),
        }),
    )
}

fn derive_class_modifiers(loader: &Arc<LoaderContext>, host: HostTypeId) -> Modifiers {
    loader.engine().with_type(host, |t| {
        let mut m = Modifiers::empty();
        if t.attribs.contains(crate::host::ty::TypeAttribs::PUBLIC) {
            m |= Modifiers::PUBLIC;
        }
        if t.is_abstract() {
            m |= Modifiers::ABSTRACT;
        }
        if t.is_sealed() {
            m |= Modifiers::FINAL;
        }
        if t.is_interface() {
            m |= Modifiers::INTERFACE | Modifiers::ABSTRACT;
        }
        m
    })
}

fn method_modifiers(attribs: MethodAttribs, note: Option<Modifiers>) -> Modifiers {
    if let Some(note) = note {
        return note;
    }
    let mut m = Modifiers::empty();
    if attribs.contains(MethodAttribs::PUBLIC) {
        m |= Modifiers::PUBLIC;
    } else if attribs.contains(MethodAttribs::PRIVATE) {
        m |= Modifiers::PRIVATE;
    } else if attribs.contains(MethodAttribs::PROTECTED) {
        m |= Modifiers::PROTECTED;
    }
    if attribs.contains(MethodAttribs::STATIC) {
        m |= Modifiers::STATIC;
    }
    if attribs.contains(MethodAttribs::FINAL) {
        m |= Modifiers::FINAL;
    }
    if attribs.contains(MethodAttribs::ABSTRACT) {
        m |= Modifiers::ABSTRACT;
    }
    if attribs.contains(MethodAttribs::SYNCHRONIZED) {
        m |= Modifiers::SYNCHRONIZED;
    }
    m
}

fn field_modifiers(attribs: FieldAttribs, note: Option<Modifiers>) -> Modifiers {
    if let Some(note) = note {
        return note;
    }
    let mut m = Modifiers::empty();
    if attribs.contains(FieldAttribs::PUBLIC) {
        m |= Modifiers::PUBLIC;
    } else if attribs.contains(FieldAttribs::PRIVATE) {
        m |= Modifiers::PRIVATE;
    } else if attribs.contains(FieldAttribs::PROTECTED) {
        m |= Modifiers::PROTECTED;
    }
    if attribs.contains(FieldAttribs::STATIC) {
        m |= Modifiers::STATIC;
    }
    if attribs.contains(FieldAttribs::INIT_ONLY) || attribs.contains(FieldAttribs::LITERAL) {
        m |= Modifiers::FINAL;
    }
    if attribs.contains(FieldAttribs::VOLATILE) {
        m |= Modifiers::VOLATILE;
    }
    if attribs.contains(FieldAttribs::TRANSIENT) {
        m |= Modifiers::TRANSIENT;
    }
    m
}

pub(crate) fn resolve_method(
    wrapper: &Arc<TypeWrapper>,
    data: &CompiledData,
    md: &MethodDescriptor,
) -> BridgeResult<Option<Arc<MethodWrapper>>> {
    // a descriptor naming a type that is still a builder shell can never
    // match an already-compiled member
    for arg in md.arg_wrappers()? {
        if !arg.is_unloadable() && !arg.is_host_type_finished() {
            return Ok(None);
        }
    }
    let loader = wrapper.loader();
    let engine = loader.engine();
    let params = md.arg_types()?.to_vec();
    let function = if md.name() == "<init>" {
        engine.find_method(data.host, "<init>", &params, Some(false))
    } else {
        engine.find_method(data.host, md.name(), &params, None)
    };
    let Some(function) = function else {
        return Ok(None);
    };
    // only members declared on this host type resolve locally; inherited
    // ones are found through the base chain
    let record = engine.function(function);
    if record.owner != data.host {
        return Ok(None);
    }
    let modifiers = engine.with_type(data.host, |t| {
        t.methods
            .iter()
            .find(|m| m.function == function)
            .map(|m| method_modifiers(m.attribs, m.foreign_modifiers))
    });
    let Some(modifiers) = modifiers else {
        return Ok(None);
    };
    Ok(Some(MethodWrapper::create(
        wrapper,
        md.clone(),
        function,
        modifiers,
    )?))
}

pub(crate) fn resolve_field(
    wrapper: &Arc<TypeWrapper>,
    data: &CompiledData,
    name: &str,
) -> BridgeResult<Option<Arc<FieldWrapper>>> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let row = engine.with_type(data.host, |t| t.field_named(name).cloned());
    let accessor = engine.with_type(data.host, |t| {
        t.methods
            .iter()
            .find(|m| {
                m.attribs.contains(MethodAttribs::SPECIAL_NAME)
                    && m.name == format!("get_{name}")
            })
            .map(|m| m.function)
    });
    match (row, accessor) {
        (Some(field), Some(getter)) => {
            // read-only accessor over a private backing store: no real
            // store is reachable from outside
            let sig = field
                .foreign_type_note
                .as_ref()
                .map(|n| format!("L{n};"))
                .unwrap_or_else(|| loader.foreign_sig_name_of(field.ty));
            let modifiers = field_modifiers(field.attribs, field.foreign_modifiers);
            Ok(Some(FieldWrapper::with_parts(
                wrapper,
                name,
                sig,
                modifiers,
                Some((data.host, field.index)),
                Some(CodeEmitter::call(getter)),
                None,
            )))
        }
        (Some(field), None) => {
            let sig = field
                .foreign_type_note
                .as_ref()
                .map(|n| format!("L{n};"))
                .unwrap_or_else(|| loader.foreign_sig_name_of(field.ty));
            let modifiers = field_modifiers(field.attribs, field.foreign_modifiers);
            if field.attribs.contains(FieldAttribs::LITERAL) {
                let literal = field.literal.clone().unwrap_or(
                    crate::host::value::HostValue::Null,
                );
                return Ok(Some(FieldWrapper::with_parts(
                    wrapper,
                    name,
                    sig,
                    modifiers,
                    None,
                    Some(CodeEmitter::load_const(literal)),
                    Some(CodeEmitter::pop()),
                )));
            }
            Ok(Some(FieldWrapper::create(
                wrapper,
                name,
                sig,
                modifiers,
                data.host,
                field.index,
            )?))
        }
        (None, _) => Ok(None),
    }
}

impl CompiledData {
    pub(crate) fn interfaces(&self, wrapper: &TypeWrapper) -> Vec<Arc<TypeWrapper>> {
        self.interfaces
            .get_or_init(|| {
                let loader = wrapper.loader();
                let ids = loader.engine().with_type(self.host, |t| t.interfaces.clone());
                ids.iter()
                    // interfaces with no known wrapper are skipped rather
                    // than failing the whole listing
                    .filter_map(|id| loader.wrapper_for_host_type(*id))
                    .collect()
            })
            .clone()
    }

    pub(crate) fn inner_classes(&self, wrapper: &Arc<TypeWrapper>) -> Vec<Arc<TypeWrapper>> {
        self.inner
            .get_or_init(|| {
                let loader = wrapper.loader();
                loader
                    .engine()
                    .types_enclosed_by(self.host)
                    .into_iter()
                    .filter_map(|id| loader.wrapper_for_host_type(id))
                    .collect()
            })
            .clone()
    }

    pub(crate) fn declaring_type(&self, wrapper: &Arc<TypeWrapper>) -> Option<Arc<TypeWrapper>> {
        let loader = wrapper.loader();
        let enclosing = loader.engine().with_type(self.host, |t| t.enclosing)?;
        loader.wrapper_for_host_type(enclosing)
    }
}
