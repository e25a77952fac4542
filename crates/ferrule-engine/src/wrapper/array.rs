//! Array wrappers
//!
//! Synthesized over host array types. An array wrapper exposes a single
//! synthetic `clone` method and becomes finished only once its element
//! chain is finished (its host array type is then concrete).

use std::sync::Arc;

use ferrule_classfile::Modifiers;

use crate::descriptor::MethodDescriptor;
use crate::emit::CodeEmitter;
use crate::error::BridgeResult;
use crate::host::value::HostTypeId;
use crate::loader::LoaderContext;
use crate::member::MethodWrapper;
use crate::wrapper::{TypeWrapper, WrapperKind};

pub(crate) struct ArrayData {
    pub(crate) host: HostTypeId,
}

/// Build an array wrapper over a host array type and register its
/// synthetic `clone`.
pub(crate) fn new_array_wrapper(
    loader: &Arc<LoaderContext>,
    name: &str,
    host: HostTypeId,
) -> Arc<TypeWrapper> {
    let wrapper = TypeWrapper::new(
        loader,
        name,
        Modifiers::PUBLIC | Modifiers::FINAL,
        Some(loader.root_wrapper()),
        WrapperKind::Array(ArrayData { host }),
    );
    let md = MethodDescriptor::new(loader, "clone", "()Ljava/lang/Object;");
    let clone = CodeEmitter::array_clone();
    let method = MethodWrapper::with_parts(
        &wrapper,
        md,
        Modifiers::PUBLIC | Modifiers::SYNTHETIC,
        None,
        None,
        Some(clone.clone()),
        Some(clone),
        None,
        false,
        false,
    );
    wrapper.add_method(method);
    wrapper
}

/// Arrays finish by finishing their element chain; the host array type is
/// concrete exactly when the innermost element is.
pub(crate) fn finish(wrapper: &Arc<TypeWrapper>) -> BridgeResult<()> {
    if wrapper.is_host_type_finished() {
        return Ok(());
    }
    let elem = wrapper.element_wrapper()?;
    elem.finish()
}
