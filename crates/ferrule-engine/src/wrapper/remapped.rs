//! Remapped wrappers
//!
//! A remapped wrapper binds a foreign class onto a pre-existing host type
//! through a declarative rule set: passthrough members resolve in place,
//! redirects re-aim at a differently named or located host member,
//! overrides replace inherited host behavior (with an override-stub
//! subtype so direct instantiation picks up the foreign behavior), and
//! virtual rules give foreign-virtual semantics to methods that have no
//! host dispatch slot at all, through a synthesized side-interface and
//! type-testing helper.

use std::sync::Arc;

use ferrule_classfile::Modifiers;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::descriptor::MethodDescriptor;
use crate::emit::CodeEmitter;
use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody};
use crate::host::builder::HostTypeBuilder;
use crate::host::engine::{FnSig, FunctionBody};
use crate::host::ty::{MethodAttribs, SlotId, TypeAttribs};
use crate::host::value::{HostFunctionId, HostTypeId};
use crate::loader::LoaderContext;
use crate::member::{FieldWrapper, MethodWrapper};
use crate::wrapper::{TypeWrapper, WrapperKind};

/// Redirect target description
#[derive(Debug, Clone, Default)]
pub struct Redirect {
    /// Target member name; defaults to the remapped member's name
    pub name: Option<String>,
    /// Target signature; defaults to the remapped member's signature
    pub sig: Option<String>,
    /// Target class (foreign name); defaults to the backing type
    pub class: Option<String>,
    /// Target binding kind; defaults to the remapped member's kind
    pub is_static: Option<bool>,
}

/// How one remapped method binds to the host
#[derive(Clone)]
pub enum MethodRemapKind {
    /// Locate the host member by name and signature
    Passthrough,
    /// Resolve a differently named/typed/located host member
    Redirect(Redirect),
    /// The foreign behavior replaces the inherited host behavior
    Override {
        /// The backing type's virtual method whose slot this occupies
        host_name: String,
        /// The foreign-correct behavior; `None` makes the override
        /// trivial (a renaming with no behavioral change)
        special: Option<CodeEmitter>,
    },
    /// Foreign-virtual with no host dispatch slot: dispatched through the
    /// synthesized side-interface, falling back to this non-virtual
    /// behavior
    Virtual {
        /// The non-virtual binding used when no override exists
        special: CodeEmitter,
    },
}

/// One method rule
#[derive(Clone)]
pub struct MethodRemap {
    /// Foreign method name
    pub name: String,
    /// Foreign signature
    pub sig: String,
    /// Foreign flag word
    pub modifiers: Modifiers,
    /// Binding rule
    pub kind: MethodRemapKind,
}

/// How one remapped constructor binds to the host
#[derive(Clone)]
pub enum CtorRemapKind {
    /// Locate the host constructor by signature
    Passthrough,
    /// Redirect construction to a static factory (final classes only)
    Redirect(Redirect),
}

/// One constructor rule
#[derive(Clone)]
pub struct CtorRemap {
    /// Foreign signature
    pub sig: String,
    /// Foreign flag word
    pub modifiers: Modifiers,
    /// Binding rule
    pub kind: CtorRemapKind,
}

/// One field rule; remapped field reads always redirect to a host method
#[derive(Clone)]
pub struct FieldRemap {
    /// Foreign field name
    pub name: String,
    /// Foreign field signature
    pub sig: String,
    /// Foreign flag word
    pub modifiers: Modifiers,
    /// The read redirect
    pub redirect: Redirect,
}

/// Declarative remapping of one foreign class onto a host type
#[derive(Clone)]
pub struct RemapSpec {
    /// Foreign class name (slash-separated)
    pub name: String,
    /// Foreign flag word of the class
    pub modifiers: Modifiers,
    /// The backing host type
    pub host_type: HostTypeId,
    /// Foreign base class; defaults to the universal root
    pub base: Option<String>,
    /// Implemented interface names
    pub interfaces: Vec<String>,
    /// Method rules
    pub methods: Vec<MethodRemap>,
    /// Constructor rules
    pub constructors: Vec<CtorRemap>,
    /// Field rules
    pub fields: Vec<FieldRemap>,
}

struct VirtualsData {
    iface: HostTypeId,
    /// Side-interface slot and helper function per (name, sig)
    helpers: FxHashMap<(String, String), (SlotId, HostFunctionId)>,
}

pub(crate) struct RemappedData {
    pub(crate) host: HostTypeId,
    pub(crate) interfaces: RwLock<Vec<Arc<TypeWrapper>>>,
    virtuals: OnceCell<VirtualsData>,
}

/// Build a remapped wrapper and load its rule set.
pub(crate) fn new_remapped_wrapper(
    loader: &Arc<LoaderContext>,
    spec: RemapSpec,
) -> BridgeResult<Arc<TypeWrapper>> {
    let base_name = spec.base.as_deref().unwrap_or("java/lang/Object");
    let base = if spec.name == base_name {
        None
    } else {
        Some(loader.load_class(base_name)?)
    };
    let mut interfaces = Vec::with_capacity(spec.interfaces.len());
    for iface in &spec.interfaces {
        interfaces.push(loader.load_class(iface)?);
    }
    let wrapper = TypeWrapper::new(
        loader,
        spec.name.clone(),
        spec.modifiers,
        base,
        WrapperKind::Remapped(RemappedData {
            host: spec.host_type,
            interfaces: RwLock::new(interfaces),
            virtuals: OnceCell::new(),
        }),
    );
    load_remappings(loader, &wrapper, &spec)?;
    Ok(wrapper)
}

fn resolve_redirect(
    loader: &Arc<LoaderContext>,
    backing: HostTypeId,
    default_name: &str,
    default_sig: &str,
    default_static: bool,
    redirect: &Redirect,
) -> BridgeResult<(HostFunctionId, String)> {
    let name = redirect.name.as_deref().unwrap_or(default_name);
    let sig = redirect.sig.as_deref().unwrap_or(default_sig);
    let is_static = redirect.is_static.unwrap_or(default_static);
    let target_ty = match &redirect.class {
        Some(class) => loader.load_class(class)?.host_type()?,
        None => backing,
    };
    let md = MethodDescriptor::new(loader, name, sig);
    let params = md.arg_types()?.to_vec();
    let engine = loader.engine();
    let function = engine
        .find_method(target_ty, name, &params, Some(is_static))
        .ok_or_else(|| {
            BridgeError::ClassNotResolvable(format!("remapping target {name}{sig} not found"))
        })?;
    Ok((function, sig.to_string()))
}

fn load_remappings(
    loader: &Arc<LoaderContext>,
    wrapper: &Arc<TypeWrapper>,
    spec: &RemapSpec,
) -> BridgeResult<()> {
    let WrapperKind::Remapped(data) = &wrapper.kind else {
        unreachable!("remapping load on non-remapped wrapper");
    };
    let engine = loader.engine();
    let backing = data.host;
    let host_name = engine.type_name(backing);

    // side-interface and helpers come first: virtual rules need them
    let virtual_rules: Vec<&MethodRemap> = spec
        .methods
        .iter()
        .filter(|m| matches!(m.kind, MethodRemapKind::Virtual { .. }))
        .collect();
    if !virtual_rules.is_empty() {
        let iface_builder = HostTypeBuilder::declare(
            engine,
            format!("{host_name}$VirtualMethods"),
            TypeAttribs::PUBLIC | TypeAttribs::INTERFACE | TypeAttribs::ABSTRACT,
            loader.unit(),
            None,
            Vec::new(),
            None,
            None,
        );
        let mut slots = FxHashMap::default();
        for rule in &virtual_rules {
            let md = MethodDescriptor::new(loader, rule.name.clone(), rule.sig.clone());
            let params = md.arg_types()?.to_vec();
            let ret = if md.returns_void() {
                None
            } else {
                Some(md.ret_wrapper()?.host_type_or_object())
            };
            let (_, slot) = iface_builder.define_method(
                rule.name.clone(),
                FnSig {
                    params,
                    ret,
                    is_static: false,
                },
                MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL | MethodAttribs::ABSTRACT,
                None,
                None,
                None,
            );
            slots.insert(
                (rule.name.clone(), rule.sig.clone()),
                slot.expect("interface methods are dispatched"),
            );
        }
        let iface = iface_builder.complete();

        let helper_builder = HostTypeBuilder::declare(
            engine,
            format!("{host_name}$VirtualMethodsHelper"),
            TypeAttribs::PUBLIC,
            loader.unit(),
            Some(engine.object_type()),
            Vec::new(),
            None,
            None,
        );
        let mut helpers = FxHashMap::default();
        for rule in &virtual_rules {
            let MethodRemapKind::Virtual { special } = &rule.kind else {
                continue;
            };
            let md = MethodDescriptor::new(loader, rule.name.clone(), rule.sig.clone());
            let mut params = vec![backing];
            params.extend(md.arg_types()?.iter().copied());
            let ret = if md.returns_void() {
                None
            } else {
                Some(md.ret_wrapper()?.host_type_or_object())
            };
            let argc = params.len() as u16;
            let sig = FnSig {
                params: params.clone(),
                ret,
                is_static: true,
            };
            // the non-virtual fallback as a real function
            let (fallback, _) = helper_builder.define_method(
                format!("{}$fallback", rule.name),
                sig.clone(),
                MethodAttribs::PUBLIC | MethodAttribs::STATIC,
                None,
                None,
                None,
            );
            let mut fallback_body = MethodBody::new();
            fallback_body.push_args(argc);
            special.emit(&mut fallback_body);
            fallback_body.push(if md.returns_void() {
                Instr::Return
            } else {
                Instr::ReturnValue
            });
            engine.set_function_body(fallback, FunctionBody::Emitted(Arc::new(fallback_body)));

            let slot = slots[&(rule.name.clone(), rule.sig.clone())];
            let (helper, _) = helper_builder.define_method(
                rule.name.clone(),
                sig,
                MethodAttribs::PUBLIC | MethodAttribs::STATIC,
                None,
                None,
                None,
            );
            let mut helper_body = MethodBody::new();
            helper_body.push_args(argc);
            helper_body.push(Instr::DispatchVirtual {
                iface,
                slot,
                fallback,
            });
            helper_body.push(if md.returns_void() {
                Instr::Return
            } else {
                Instr::ReturnValue
            });
            engine.set_function_body(helper, FunctionBody::Emitted(Arc::new(helper_body)));
            helpers.insert((rule.name.clone(), rule.sig.clone()), (slot, helper));
        }
        helper_builder.complete();
        let _ = data.virtuals.set(VirtualsData { iface, helpers });
    }

    // method rules
    let mut overrides: Vec<(Arc<MethodWrapper>, SlotId)> = Vec::new();
    for rule in &spec.methods {
        let md = MethodDescriptor::new(loader, rule.name.clone(), rule.sig.clone());
        let params = md.arg_types()?.to_vec();
        let method = match &rule.kind {
            MethodRemapKind::Passthrough => {
                let function = engine
                    .find_method(backing, &rule.name, &params, Some(rule.modifiers.is_static()))
                    .ok_or_else(|| {
                        BridgeError::ClassNotResolvable(format!(
                            "declared method {}.{}{} not found",
                            spec.name, rule.name, rule.sig
                        ))
                    })?;
                MethodWrapper::create(wrapper, md, function, rule.modifiers)?
            }
            MethodRemapKind::Redirect(redirect) => {
                let (function, target_sig) = resolve_redirect(
                    loader,
                    backing,
                    &rule.name,
                    &rule.sig,
                    rule.modifiers.is_static(),
                    redirect,
                )?;
                let mut call = CodeEmitter::call(function);
                if crate::wrapper::dynamic::ret_shapes_differ(&rule.sig, &target_sig) {
                    let ret = md.ret_wrapper()?.host_type_or_object();
                    call = call.then(CodeEmitter::cast(ret));
                }
                MethodWrapper::with_parts(
                    wrapper,
                    md,
                    rule.modifiers,
                    None,
                    Some(function),
                    Some(call.clone()),
                    Some(call),
                    None,
                    false,
                    false,
                )
            }
            MethodRemapKind::Override { host_name, special } => {
                let function = engine
                    .find_method(backing, host_name, &params, Some(false))
                    .ok_or_else(|| {
                        BridgeError::ClassNotResolvable(format!(
                            "override method {host_name} not found on {}",
                            spec.name
                        ))
                    })?;
                let slot = engine
                    .with_type(engine.function(function).owner, |t| {
                        t.methods
                            .iter()
                            .find(|m| m.function == function)
                            .and_then(|m| m.slot)
                    })
                    .ok_or_else(|| {
                        BridgeError::IllegalState(format!(
                            "override target {host_name} has no dispatch slot"
                        ))
                    })?;
                let call = special
                    .clone()
                    .unwrap_or_else(|| CodeEmitter::call(function));
                let is_override = special.is_some();
                let method = MethodWrapper::with_parts(
                    wrapper,
                    md,
                    rule.modifiers,
                    Some(function),
                    None,
                    Some(call),
                    Some(CodeEmitter::call_virtual(slot)),
                    None,
                    is_override,
                    false,
                );
                if is_override {
                    overrides.push((method.clone(), slot));
                }
                method
            }
            MethodRemapKind::Virtual { special } => {
                let virtuals = data.virtuals.get().expect("virtuals built above");
                let (_, helper) = virtuals.helpers[&(rule.name.clone(), rule.sig.clone())];
                MethodWrapper::with_parts(
                    wrapper,
                    md,
                    rule.modifiers,
                    None,
                    None,
                    Some(special.clone()),
                    Some(CodeEmitter::call(helper)),
                    None,
                    false,
                    true,
                )
            }
        };
        wrapper.add_method(method);
    }

    // when overrides exist, direct instantiation must still observe the
    // foreign behavior: a stub subtype re-binds the overridden slots
    let stub_ty = if overrides.is_empty() {
        None
    } else {
        let stub_builder = HostTypeBuilder::declare(
            engine,
            format!("{host_name}$OverrideStub"),
            engine.with_type(backing, |t| t.attribs),
            loader.unit(),
            Some(backing),
            Vec::new(),
            None,
            None,
        );
        for (method, slot) in &overrides {
            let md = method.descriptor();
            let params = md.arg_types()?.to_vec();
            let ret = if md.returns_void() {
                None
            } else {
                Some(md.ret_wrapper()?.host_type_or_object())
            };
            let argc = params.len() as u16 + 1;
            let (stub, _) = stub_builder.define_method(
                md.name().to_string(),
                FnSig {
                    params,
                    ret,
                    is_static: false,
                },
                MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
                Some(*slot),
                None,
                None,
            );
            let call = method
                .emit_call()
                .expect("override rules carry a call strategy");
            let mut body = MethodBody::new();
            body.push_args(argc);
            call.emit(&mut body);
            body.push(if md.returns_void() {
                Instr::Return
            } else {
                Instr::ReturnValue
            });
            engine.set_function_body(stub, FunctionBody::Emitted(Arc::new(body)));
        }
        Some(stub_builder)
    };

    // constructor rules; with a stub subtype in play, construction is
    // re-aimed at the stub so fresh instances dispatch foreign behavior
    for rule in &spec.constructors {
        let md = MethodDescriptor::new(loader, "<init>", rule.sig.clone());
        let params = md.arg_types()?.to_vec();
        let method = match &rule.kind {
            CtorRemapKind::Passthrough => {
                let backing_ctor = engine
                    .find_method(backing, "<init>", &params, Some(false))
                    .ok_or_else(|| {
                        BridgeError::ClassNotResolvable(format!(
                            "declared constructor {}{} not found",
                            spec.name, rule.sig
                        ))
                    })?;
                let construct = match &stub_ty {
                    Some(stub_builder) => {
                        let argc = params.len() as u16 + 1;
                        let (stub_ctor, _) = stub_builder.define_method(
                            "<init>".to_string(),
                            FnSig {
                                params: params.clone(),
                                ret: None,
                                is_static: false,
                            },
                            MethodAttribs::PUBLIC,
                            None,
                            None,
                            None,
                        );
                        let mut body = MethodBody::new();
                        body.push_args(argc);
                        body.push(Instr::CallDirect(backing_ctor));
                        body.push(Instr::Return);
                        engine.set_function_body(
                            stub_ctor,
                            FunctionBody::Emitted(Arc::new(body)),
                        );
                        CodeEmitter::construct(stub_ctor)
                    }
                    None => CodeEmitter::construct(backing_ctor),
                };
                MethodWrapper::with_parts(
                    wrapper,
                    md,
                    rule.modifiers,
                    Some(backing_ctor),
                    None,
                    Some(CodeEmitter::call(backing_ctor)),
                    None,
                    Some(construct),
                    false,
                    false,
                )
            }
            CtorRemapKind::Redirect(redirect) => {
                // only final classes can redirect construction to a
                // factory; subclassing would need the two call shapes
                // distinguished
                if !spec.modifiers.is_final() {
                    return Err(BridgeError::IllegalState(format!(
                        "constructor redirect on non-final class {}",
                        spec.name
                    )));
                }
                let (function, target_sig) =
                    resolve_redirect(loader, backing, "<init>", &rule.sig, true, redirect)?;
                let mut construct = CodeEmitter::call(function);
                let ret_of_target = ferrule_classfile::ret_sig_of(&target_sig);
                let expected = format!("L{};", spec.name);
                if ret_of_target != expected {
                    construct = construct.then(CodeEmitter::cast(backing));
                }
                MethodWrapper::with_parts(
                    wrapper,
                    md,
                    rule.modifiers,
                    None,
                    Some(function),
                    None,
                    None,
                    Some(construct),
                    false,
                    false,
                )
            }
        };
        wrapper.add_method(method);
    }
    if let Some(stub_builder) = stub_ty {
        stub_builder.complete();
    }

    // field rules: reads redirect to a host method, writes do not exist
    for rule in &spec.fields {
        let (function, target_sig) = resolve_redirect(
            loader,
            backing,
            &rule.name,
            &format!("(){}", rule.sig),
            rule.modifiers.is_static(),
            &rule.redirect,
        )?;
        let mut get = CodeEmitter::call(function);
        if !target_sig.ends_with(&rule.sig) {
            let field_type = loader.wrapper_from_field_sig(&rule.sig)?;
            get = get.then(CodeEmitter::cast(field_type.host_type_or_object()));
        }
        wrapper.add_field(FieldWrapper::with_parts(
            wrapper,
            rule.name.clone(),
            rule.sig.clone(),
            rule.modifiers,
            None,
            Some(get),
            None,
        ));
    }

    Ok(())
}

/// Equip a dynamic subtype of a remapped base: implement the
/// side-interface and forward any override or virtual method the subtype
/// does not itself declare.
pub(crate) fn implement_override_stubs_and_virtuals(
    base: &Arc<TypeWrapper>,
    builder: &HostTypeBuilder,
    subtype: &Arc<TypeWrapper>,
) -> BridgeResult<()> {
    let WrapperKind::Remapped(data) = &base.kind else {
        return Ok(());
    };
    let loader = subtype.loader();
    let engine = loader.engine();
    if let Some(virtuals) = data.virtuals.get() {
        builder.add_interface(virtuals.iface);
    }
    for method in base.get_methods() {
        let md = method.descriptor().clone();
        let declared = subtype.get_method_wrapper(&md, false)?.is_some();
        if declared {
            continue;
        }
        if method.is_remapped_override() {
            let params = md.arg_types()?.to_vec();
            let ret = if md.returns_void() {
                None
            } else {
                Some(md.ret_wrapper()?.host_type_or_object())
            };
            let argc = params.len() as u16 + 1;
            let override_slot = method.dispatch_slot();
            let (stub, _) = builder.define_method(
                md.name().to_string(),
                FnSig {
                    params,
                    ret,
                    is_static: false,
                },
                MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
                override_slot,
                None,
                Some(Modifiers::SYNTHETIC),
            );
            let call = method.emit_call().ok_or_else(|| {
                BridgeError::IllegalState(format!("{} has no call strategy", md.name()))
            })?;
            let mut body = MethodBody::new();
            body.push_args(argc);
            call.emit(&mut body);
            body.push(if md.returns_void() {
                Instr::Return
            } else {
                Instr::ReturnValue
            });
            engine.set_function_body(stub, FunctionBody::Emitted(Arc::new(body)));
        } else if method.is_remapped_virtual() {
            let params = md.arg_types()?.to_vec();
            let ret = if md.returns_void() {
                None
            } else {
                Some(md.ret_wrapper()?.host_type_or_object())
            };
            let argc = params.len() as u16 + 1;
            let (stub, _) = builder.define_method(
                md.name().to_string(),
                FnSig {
                    params,
                    ret,
                    is_static: false,
                },
                MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
                None,
                None,
                Some(Modifiers::SYNTHETIC),
            );
            let call = method.emit_call().ok_or_else(|| {
                BridgeError::IllegalState(format!("{} has no call strategy", md.name()))
            })?;
            let mut body = MethodBody::new();
            body.push_args(argc);
            call.emit(&mut body);
            body.push(if md.returns_void() {
                Instr::Return
            } else {
                Instr::ReturnValue
            });
            engine.set_function_body(stub, FunctionBody::Emitted(Arc::new(body)));
        }
    }
    Ok(())
}
