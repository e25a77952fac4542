//! Interface conformance stub synthesis
//!
//! The host only grants natural interface conformance to public,
//! same-named methods visible within one compilation unit. The foreign
//! model is looser: non-public methods can satisfy a same-named interface
//! contract, inherited members satisfy interfaces across units, and a
//! type may simply not implement an interface method at all. This pass
//! walks every implemented interface (visited-set guarded, recursing into
//! super-interfaces) and synthesizes whatever stub each slot needs.

use std::sync::Arc;

use ferrule_classfile::Modifiers;
use rustc_hash::FxHashSet;

use crate::descriptor::MethodDescriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody, ThrowKind};
use crate::host::builder::HostTypeBuilder;
use crate::host::engine::{FnSig, FunctionBody};
use crate::host::ty::{MethodAttribs, SlotId};
use crate::member::MethodWrapper;
use crate::wrapper::TypeWrapper;

struct IfaceMethod {
    md: MethodDescriptor,
    slot: SlotId,
}

fn interface_methods(iface: &Arc<TypeWrapper>) -> BridgeResult<Vec<IfaceMethod>> {
    let loader = iface.loader();
    let engine = loader.engine();
    let host = iface.host_type()?;
    let rows = engine.with_type(host, |t| {
        t.methods
            .iter()
            .filter(|m| !m.attribs.contains(MethodAttribs::STATIC))
            .filter_map(|m| m.slot.map(|slot| (slot, m.function)))
            .collect::<Vec<_>>()
    });
    let mut out = Vec::with_capacity(rows.len());
    for (slot, function) in rows {
        let record = engine.function(function);
        out.push(IfaceMethod {
            md: MethodDescriptor::from_host_function(&loader, &record),
            slot,
        });
    }
    Ok(out)
}

/// Synthesize conformance stubs on `target` (a concrete type being
/// finished) for every method of `iface` and, recursively, of its
/// super-interfaces.
pub(crate) fn implement_interface_stubs(
    iface: &Arc<TypeWrapper>,
    builder: &HostTypeBuilder,
    target: &Arc<TypeWrapper>,
    done: &mut FxHashSet<*const TypeWrapper>,
) -> BridgeResult<()> {
    if !iface.is_interface() {
        return Err(BridgeError::IllegalState(format!(
            "{} is not an interface",
            iface.name()
        )));
    }
    if !done.insert(Arc::as_ptr(iface)) {
        return Ok(());
    }
    iface.finish()?;

    let loader = target.loader();
    let engine = loader.engine();
    let target_unit = engine.with_type(target.host_type()?, |t| t.unit);

    for method in interface_methods(iface)? {
        let md = &method.md;
        let argc = md.arg_count() as u16;
        let params = md.arg_types()?.to_vec();
        let ret = if md.returns_void() {
            None
        } else {
            Some(md.ret_wrapper()?.host_type_or_object())
        };
        let sig = FnSig {
            params,
            ret,
            is_static: false,
        };
        let mangled = format!("{}${}${}", iface.name(), md.name(), target.name());

        match target.get_method_wrapper(md, true)? {
            Some(mce) => {
                let host_name = mce
                    .host_function()
                    .map(|f| engine.function(f).name.clone());
                if !mce.is_public() {
                    // the foreign model lets a non-public method satisfy
                    // a same-named interface contract; the host does not.
                    // A private, name-mangled stub fills the slot and
                    // throws on use.
                    let (stub, _) = builder.define_method(
                        mangled,
                        sig,
                        MethodAttribs::PRIVATE
                            | MethodAttribs::VIRTUAL
                            | MethodAttribs::FINAL
                            | MethodAttribs::NEW_SLOT,
                        None,
                        None,
                        Some(Modifiers::SYNTHETIC),
                    );
                    let detail =
                        format!("{}.{}{}", target.name(), md.name(), md.signature());
                    engine.set_function_body(
                        stub,
                        FunctionBody::Emitted(Arc::new(MethodBody {
                            code: vec![Instr::Throw(ThrowKind::IllegalAccess, detail)],
                        })),
                    );
                    builder.define_explicit_override(method.slot, stub);
                } else if host_name.as_deref() != Some(md.name()) {
                    // the providing method is named differently on the
                    // host side: forward through a mangled stub
                    let (stub, _) = builder.define_method(
                        mangled,
                        sig,
                        MethodAttribs::PRIVATE
                            | MethodAttribs::VIRTUAL
                            | MethodAttribs::FINAL
                            | MethodAttribs::NEW_SLOT,
                        None,
                        None,
                        Some(Modifiers::SYNTHETIC),
                    );
                    let forward = mce.emit_call_virtual().or(mce.emit_call()).ok_or_else(
                        || {
                            BridgeError::IllegalState(format!(
                                "{} has no call strategy",
                                md.name()
                            ))
                        },
                    )?;
                    let mut body = MethodBody::new();
                    body.push_args(argc + 1);
                    forward.emit(&mut body);
                    body.push(if md.returns_void() {
                        Instr::Return
                    } else {
                        Instr::ReturnValue
                    });
                    engine.set_function_body(stub, FunctionBody::Emitted(Arc::new(body)));
                    builder.define_explicit_override(method.slot, stub);
                } else {
                    let provider_unit = mce.host_function().map(|f| {
                        let owner = engine.function(f).owner;
                        engine.with_type(owner, |t| t.unit)
                    });
                    if provider_unit != Some(target_unit) {
                        // members inherited across compilation units do
                        // not satisfy interface slots on the host; a
                        // trivial forwarding stub does
                        if mce.is_abstract() {
                            return Err(BridgeError::IllegalState(format!(
                                "abstract cross-unit provider for {}.{}",
                                target.name(),
                                md.name()
                            )));
                        }
                        let call = mce.emit_call().ok_or_else(|| {
                            BridgeError::IllegalState(format!(
                                "{} has no call strategy",
                                md.name()
                            ))
                        })?;
                        let (stub, _) = builder.define_method(
                            md.name().to_string(),
                            sig,
                            MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
                            mce.dispatch_slot(),
                            None,
                            Some(Modifiers::SYNTHETIC),
                        );
                        let mut body = MethodBody::new();
                        body.push_args(argc + 1);
                        call.emit(&mut body);
                        body.push(if md.returns_void() {
                            Instr::Return
                        } else {
                            Instr::ReturnValue
                        });
                        engine.set_function_body(stub, FunctionBody::Emitted(Arc::new(body)));
                        builder.define_explicit_override(method.slot, stub);
                    }
                    // otherwise the host's natural conformance suffices
                }
            }
            None => {
                let modifiers =
                    Modifiers::SYNTHETIC | Modifiers::PUBLIC | Modifiers::ABSTRACT;
                if target.is_abstract() {
                    // an abstract placeholder registered as a real member,
                    // so subclasses see themselves overriding it rather
                    // than introducing a fresh method
                    let (stub, _) = builder.define_method(
                        md.name().to_string(),
                        sig,
                        MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL | MethodAttribs::ABSTRACT,
                        None,
                        None,
                        Some(modifiers),
                    );
                    target.add_method(MethodWrapper::create(
                        target,
                        md.clone(),
                        stub,
                        modifiers,
                    )?);
                } else {
                    // the foreign model allows a concrete class to leave
                    // the method unimplemented; the host needs a slot, so
                    // it gets a throwing stub
                    let (stub, _) = builder.define_method(
                        md.name().to_string(),
                        sig,
                        MethodAttribs::PRIVATE | MethodAttribs::VIRTUAL | MethodAttribs::NEW_SLOT,
                        None,
                        None,
                        Some(modifiers),
                    );
                    let detail =
                        format!("{}.{}{}", target.name(), md.name(), md.signature());
                    engine.set_function_body(
                        stub,
                        FunctionBody::Emitted(Arc::new(MethodBody {
                            code: vec![Instr::Throw(ThrowKind::AbstractMethod, detail)],
                        })),
                    );
                    builder.define_explicit_override(method.slot, stub);
                    target.add_method(MethodWrapper::create(
                        target,
                        md.clone(),
                        stub,
                        modifiers,
                    )?);
                }
            }
        }
    }

    for sub in iface.interfaces() {
        implement_interface_stubs(&sub, builder, target, done)?;
    }
    Ok(())
}
