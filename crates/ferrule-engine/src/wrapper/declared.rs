//! Externally declared wrappers
//!
//! A pre-existing host type force-exposed under a foreign class name.
//! Member resolution is narrow and best-effort: probe the host type by
//! name and signature, wrap what is found, report nothing otherwise.

use std::sync::Arc;

use ferrule_classfile::Modifiers;

use crate::descriptor::MethodDescriptor;
use crate::error::BridgeResult;
use crate::host::ty::MethodAttribs;
use crate::host::value::HostTypeId;
use crate::loader::LoaderContext;
use crate::member::{FieldWrapper, MethodWrapper};
use crate::wrapper::{TypeWrapper, WrapperKind};

pub(crate) struct DeclaredData {
    pub(crate) host: HostTypeId,
}

pub(crate) fn new_declared_wrapper(
    loader: &Arc<LoaderContext>,
    name: &str,
    modifiers: Modifiers,
    host: HostTypeId,
    base: Option<Arc<TypeWrapper>>,
) -> Arc<TypeWrapper> {
    TypeWrapper::new(
        loader,
        name,
        modifiers,
        base,
        WrapperKind::Declared(DeclaredData { host }),
    )
}

pub(crate) fn resolve_method(
    wrapper: &Arc<TypeWrapper>,
    data: &DeclaredData,
    md: &MethodDescriptor,
) -> BridgeResult<Option<Arc<MethodWrapper>>> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let params = md.arg_types()?.to_vec();
    let want_static = None;
    let Some(function) = engine.find_method(data.host, md.name(), &params, want_static) else {
        return Ok(None);
    };
    let record = engine.function(function);
    if record.owner != data.host {
        return Ok(None);
    }
    let mut modifiers = Modifiers::empty();
    if record.attribs.contains(MethodAttribs::PUBLIC) {
        modifiers |= Modifiers::PUBLIC;
    } else if record.attribs.contains(MethodAttribs::PROTECTED) {
        modifiers |= Modifiers::PROTECTED;
    } else if record.attribs.contains(MethodAttribs::PRIVATE) {
        modifiers |= Modifiers::PRIVATE;
    }
    if record.sig.is_static {
        modifiers |= Modifiers::STATIC;
    }
    Ok(Some(MethodWrapper::create(
        wrapper,
        md.clone(),
        function,
        modifiers,
    )?))
}

pub(crate) fn resolve_field(
    wrapper: &Arc<TypeWrapper>,
    data: &DeclaredData,
    name: &str,
) -> BridgeResult<Option<Arc<FieldWrapper>>> {
    let loader = wrapper.loader();
    let engine = loader.engine();
    let Some(row) = engine.with_type(data.host, |t| t.field_named(name).cloned()) else {
        return Ok(None);
    };
    let sig = loader.foreign_sig_name_of(row.ty);
    let mut modifiers = Modifiers::PUBLIC;
    if row.attribs.contains(crate::host::ty::FieldAttribs::STATIC) {
        modifiers |= Modifiers::STATIC;
    }
    Ok(Some(FieldWrapper::create(
        wrapper,
        name,
        sig,
        modifiers,
        data.host,
        row.index,
    )?))
}
