//! Host type metadata

use bitflags::bitflags;
use ferrule_classfile::Modifiers;
use rustc_hash::FxHashMap;

use crate::host::value::{HostFunctionId, HostTypeId, HostValue, PrimitiveKind, UnitId};

bitflags! {
    /// Attributes of a host type
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttribs: u16 {
        /// Visible outside its unit
        const PUBLIC = 0x0001;
        /// Cannot be instantiated
        const ABSTRACT = 0x0002;
        /// Cannot be subclassed
        const SEALED = 0x0004;
        /// Interface type
        const INTERFACE = 0x0008;
        /// Value-type representation
        const VALUE_TYPE = 0x0010;
    }
}

bitflags! {
    /// Attributes of a host field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAttribs: u16 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only in the declaring type
        const PRIVATE = 0x0002;
        /// Visible to the declaring type and subclasses
        const PROTECTED = 0x0004;
        /// Visible within the declaring unit
        const ASSEMBLY = 0x0008;
        /// Class-level storage
        const STATIC = 0x0010;
        /// Compile-time constant; reads are inlined, the field has no
        /// runtime storage
        const LITERAL = 0x0020;
        /// Assignable only during initialization
        const INIT_ONLY = 0x0040;
        /// Accesses have acquire/release semantics
        const VOLATILE = 0x0080;
        /// Excluded from serialized forms
        const TRANSIENT = 0x0100;
    }
}

bitflags! {
    /// Attributes of a host method
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttribs: u16 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only in the declaring type
        const PRIVATE = 0x0002;
        /// Visible to the declaring type and subclasses
        const PROTECTED = 0x0004;
        /// Visible within the declaring unit
        const ASSEMBLY = 0x0008;
        /// No receiver
        const STATIC = 0x0010;
        /// Participates in virtual dispatch
        const VIRTUAL = 0x0020;
        /// Slot cannot be re-bound by subclasses
        const FINAL = 0x0040;
        /// No body; subclasses must bind the slot
        const ABSTRACT = 0x0080;
        /// Claims a fresh dispatch slot even if a base slot matches by name
        const NEW_SLOT = 0x0100;
        /// Holds the receiver monitor for the duration of the call
        const SYNCHRONIZED = 0x0200;
        /// Compiler-generated accessor naming convention
        const SPECIAL_NAME = 0x0400;
    }
}

impl MethodAttribs {
    /// Does this method occupy a virtual-dispatch slot?
    pub fn is_dispatched(self) -> bool {
        self.contains(MethodAttribs::VIRTUAL) && !self.contains(MethodAttribs::STATIC)
    }
}

/// A virtual- or interface-dispatch slot.
///
/// Slot identities are allocated process-wide by the engine, so a slot
/// claimed by a base type never collides with one claimed later by a
/// derived type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

/// What a host type is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTypeKind {
    /// Ordinary class
    Class,
    /// Interface
    Interface,
    /// Pre-registered primitive
    Primitive(PrimitiveKind),
    /// Array over an element type
    Array {
        /// Element type
        elem: HostTypeId,
    },
}

/// A declared host field
#[derive(Debug, Clone)]
pub struct HostField {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: HostTypeId,
    /// Attributes
    pub attribs: FieldAttribs,
    /// Constant value of a literal field
    pub literal: Option<HostValue>,
    /// Storage index: instance slot for instance fields, static slot for
    /// statics
    pub index: u16,
    /// Foreign flag word, recorded when the host encoding cannot express
    /// it exactly
    pub foreign_modifiers: Option<Modifiers>,
    /// True foreign type name of a field whose type was unloadable and
    /// degraded to the root object type
    pub foreign_type_note: Option<String>,
}

/// A declared host method
#[derive(Debug, Clone)]
pub struct HostMethod {
    /// Method name
    pub name: String,
    /// Bound executable
    pub function: HostFunctionId,
    /// Attributes
    pub attribs: MethodAttribs,
    /// Dispatch slot of virtual methods
    pub slot: Option<SlotId>,
    /// Foreign flag word, recorded when the host encoding cannot express
    /// it exactly
    pub foreign_modifiers: Option<Modifiers>,
}

/// One host type: a builder shell until `completed`, immutable afterwards
#[derive(Debug, Clone)]
pub struct HostType {
    /// Registry handle
    pub id: HostTypeId,
    /// Dotted host name
    pub name: String,
    /// Attributes
    pub attribs: TypeAttribs,
    /// Kind
    pub kind: HostTypeKind,
    /// Declaring compilation unit
    pub unit: UnitId,
    /// Base type (`None` for the root, primitives, and interfaces)
    pub base: Option<HostTypeId>,
    /// Directly implemented interfaces
    pub interfaces: Vec<HostTypeId>,
    /// Lexically enclosing type, when emitted nested
    pub enclosing: Option<HostTypeId>,
    /// Declared fields
    pub fields: Vec<HostField>,
    /// Instance-field slots of all bases combined; this type's own
    /// instance fields start here
    pub instance_field_start: u16,
    /// Total instance-field slots including inherited ones
    pub instance_field_total: u16,
    /// Declared methods
    pub methods: Vec<HostMethod>,
    /// Slot bindings contributed by this type (virtual and interface
    /// slots alike); dispatch walks the base chain, most-derived first
    pub slot_bindings: FxHashMap<SlotId, HostFunctionId>,
    /// Class initializer
    pub clinit: Option<HostFunctionId>,
    /// Foreign flag word of the class, when recorded
    pub foreign_modifiers: Option<Modifiers>,
    /// Builder shells start false; completion is one-way
    pub completed: bool,
}

impl HostType {
    /// Is this an interface?
    pub fn is_interface(&self) -> bool {
        self.attribs.contains(TypeAttribs::INTERFACE)
    }

    /// Is this abstract?
    pub fn is_abstract(&self) -> bool {
        self.attribs.contains(TypeAttribs::ABSTRACT)
    }

    /// Is this sealed?
    pub fn is_sealed(&self) -> bool {
        self.attribs.contains(TypeAttribs::SEALED)
    }

    /// Is this a value type?
    pub fn is_value_type(&self) -> bool {
        self.attribs.contains(TypeAttribs::VALUE_TYPE)
    }

    /// Declared field by name.
    pub fn field_named(&self, name: &str) -> Option<&HostField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared method rows by name.
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HostMethod> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Number of static-field slots declared here.
    pub fn static_field_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.attribs.contains(FieldAttribs::STATIC) && !f.attribs.contains(FieldAttribs::LITERAL))
            .count()
    }
}

/// Map foreign member visibility onto host field attributes.
pub fn field_visibility(modifiers: Modifiers) -> FieldAttribs {
    if modifiers.is_private() {
        FieldAttribs::PRIVATE
    } else if modifiers.is_protected() {
        FieldAttribs::PROTECTED
    } else if modifiers.is_public() {
        FieldAttribs::PUBLIC
    } else {
        FieldAttribs::ASSEMBLY
    }
}

/// Map foreign member visibility onto host method attributes.
pub fn method_visibility(modifiers: Modifiers) -> MethodAttribs {
    if modifiers.is_private() {
        MethodAttribs::PRIVATE
    } else if modifiers.is_protected() {
        MethodAttribs::PROTECTED
    } else if modifiers.is_public() {
        MethodAttribs::PUBLIC
    } else {
        MethodAttribs::ASSEMBLY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_mapping() {
        assert_eq!(field_visibility(Modifiers::PUBLIC), FieldAttribs::PUBLIC);
        assert_eq!(field_visibility(Modifiers::empty()), FieldAttribs::ASSEMBLY);
        assert_eq!(
            method_visibility(Modifiers::PROTECTED),
            MethodAttribs::PROTECTED
        );
    }

    #[test]
    fn test_dispatched_predicate() {
        assert!((MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL).is_dispatched());
        assert!(!(MethodAttribs::STATIC | MethodAttribs::VIRTUAL).is_dispatched());
        assert!(!MethodAttribs::PUBLIC.is_dispatched());
    }
}
