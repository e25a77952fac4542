//! Member descriptors
//!
//! A descriptor is the canonical, hashable identity of a member: its name
//! plus its foreign signature string. Host-type and wrapper views of the
//! signature are resolved on first access and memoized; they are never
//! recomputed or invalidated.
//!
//! Equality and hashing deliberately ignore the owning loader context:
//! under multiple isolated loaders, two distinct classes with the same
//! foreign name collide. This is a known limitation, kept as documented;
//! strict multi-loader correctness would key on resolved type identity
//! instead of name strings.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;

use crate::error::{BridgeError, BridgeResult};
use crate::host::engine::HostFunction;
use crate::host::value::HostTypeId;
use crate::loader::LoaderContext;
use crate::wrapper::TypeWrapper;

/// Identity of a method: (owning loader, name, foreign signature)
#[derive(Clone)]
pub struct MethodDescriptor {
    loader: Weak<LoaderContext>,
    name: String,
    sig: String,
    arg_types: OnceCell<Vec<HostTypeId>>,
    ret_type: OnceCell<HostTypeId>,
    arg_wrappers: OnceCell<Vec<Arc<TypeWrapper>>>,
    ret_wrapper: OnceCell<Arc<TypeWrapper>>,
}

impl MethodDescriptor {
    /// New descriptor. The signature must use slash-separated class names.
    pub fn new(
        loader: &Arc<LoaderContext>,
        name: impl Into<String>,
        sig: impl Into<String>,
    ) -> MethodDescriptor {
        let sig = sig.into();
        // class names in signatures are slashed, never dotted
        debug_assert!(!sig.contains('.'), "dotted name in signature: {sig}");
        MethodDescriptor {
            loader: Arc::downgrade(loader),
            name: name.into(),
            sig,
            arg_types: OnceCell::new(),
            ret_type: OnceCell::new(),
            arg_wrappers: OnceCell::new(),
            ret_wrapper: OnceCell::new(),
        }
    }

    /// Re-derive a descriptor from an existing host executable, producing
    /// the canonical foreign signature of its parameter and return types.
    pub fn from_host_function(
        loader: &Arc<LoaderContext>,
        function: &HostFunction,
    ) -> MethodDescriptor {
        let mut sig = String::from("(");
        for param in &function.sig.params {
            sig.push_str(&loader.foreign_sig_name_of(*param));
        }
        sig.push(')');
        let is_initializer = function.name == "<init>" || function.name == "<clinit>";
        if is_initializer {
            sig.push('V');
        } else {
            match function.sig.ret {
                Some(ret) => sig.push_str(&loader.foreign_sig_name_of(ret)),
                None => sig.push('V'),
            }
        }
        MethodDescriptor::new(loader, function.name.clone(), sig)
    }

    /// Member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Foreign signature string.
    pub fn signature(&self) -> &str {
        &self.sig
    }

    fn loader(&self) -> Arc<LoaderContext> {
        self.loader
            .upgrade()
            .expect("loader context dropped while descriptors are live")
    }

    /// Argument types as foreign wrappers. Resolved once, cached forever.
    pub fn arg_wrappers(&self) -> BridgeResult<&[Arc<TypeWrapper>]> {
        self.arg_wrappers
            .get_or_try_init(|| self.loader().arg_wrappers_from_sig(&self.sig))
            .map(|v| v.as_slice())
    }

    /// Return type as a foreign wrapper. Resolved once, cached forever.
    pub fn ret_wrapper(&self) -> BridgeResult<&Arc<TypeWrapper>> {
        self.ret_wrapper
            .get_or_try_init(|| self.loader().ret_wrapper_from_sig(&self.sig))
    }

    /// Argument types as host types (unloadable types degrade to the root
    /// object type).
    pub fn arg_types(&self) -> BridgeResult<&[HostTypeId]> {
        self.arg_types
            .get_or_try_init(|| {
                let wrappers = self.arg_wrappers()?;
                Ok(wrappers.iter().map(|w| w.host_type_or_object()).collect())
            })
            .map(|v| v.as_slice())
    }

    /// Return type as a host type (void maps to the void primitive type;
    /// unloadable degrades to the root object type).
    pub fn ret_type(&self) -> BridgeResult<HostTypeId> {
        self.ret_type
            .get_or_try_init(|| Ok(self.ret_wrapper()?.host_type_or_object()))
            .copied()
    }

    /// Does the method return void?
    pub fn returns_void(&self) -> bool {
        ferrule_classfile::ret_sig_of(&self.sig) == "V"
    }

    /// Argument count.
    pub fn arg_count(&self) -> usize {
        match ferrule_classfile::split_method_sig(&self.sig) {
            Ok((args, _)) => args.len(),
            Err(_) => 0,
        }
    }
}

impl PartialEq for MethodDescriptor {
    fn eq(&self, other: &Self) -> bool {
        // loader identity intentionally excluded; see module docs
        self.name == other.name && self.sig == other.sig
    }
}

impl Eq for MethodDescriptor {}

impl Hash for MethodDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.sig.hash(state);
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.sig)
    }
}
