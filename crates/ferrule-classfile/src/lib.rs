//! Foreign class data model for the Ferrule runtime bridge
//!
//! This crate defines the records a class-file parser produces and the
//! bridge engine consumes: access-flag words, class/field/method
//! declarations with their constant values, the nested-class relationship
//! table, and utilities over foreign signature strings.
//!
//! Class names are always slash-separated (`foo/bar/Baz`); signatures use
//! the foreign descriptor grammar (`(ILfoo/Bar;)V`). Dotted names never
//! appear in this layer.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod modifiers;
pub mod signature;

pub use class::{
    inner_class_simple_name, ClassData, ClassDataError, ConstantValue, FieldData, InnerClassRel,
    MethodData,
};
pub use modifiers::Modifiers;
pub use signature::{
    field_sig_is_valid, package_of, ret_sig_of, split_method_sig, SigElem, SigError,
};
