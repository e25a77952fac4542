//! Host execution engine model
//!
//! The host side of the bridge: a class-and-vtable execution engine with
//! stricter rules than the foreign object model. Concrete types cannot
//! carry callable abstract slots, overrides cannot narrow accessibility,
//! interface conformance is not inherited across compilation units, and
//! static initializers are not chained across the bridge. The emission
//! engine exists to paper over exactly these differences.

pub mod body;
pub mod builder;
pub mod engine;
pub mod interp;
pub mod ty;
pub mod value;

pub use body::{Instr, MethodBody, ThrowKind};
pub use builder::HostTypeBuilder;
pub use engine::{
    FnSig, FunctionBody, HostEngine, HostFunction, NativeFn, NativeInvoker, NativeKey,
    ObjectData, ROOT_TYPE_NAME,
};
pub use ty::{
    FieldAttribs, HostField, HostMethod, HostType, HostTypeKind, MethodAttribs, SlotId,
    TypeAttribs,
};
pub use value::{HostFunctionId, HostTypeId, HostValue, ObjectRef, PrimitiveKind, UnitId};
