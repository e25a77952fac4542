//! Declare-then-complete host type building
//!
//! A builder declares a type shell immediately (so references to the type
//! can circulate while members are still being emitted) and completes it
//! exactly once. Completion computes the host's *natural* interface
//! conformance: explicit bindings win; otherwise a public method with
//! matching name and signature declared on the type, or inherited from a
//! base in the same compilation unit, satisfies the slot. Everything else
//! stays unbound — the emission engine synthesizes stubs for those holes.

use std::sync::Arc;

use ferrule_classfile::Modifiers;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::host::engine::{FnSig, HostEngine, NativeKey};
use crate::host::ty::{
    FieldAttribs, HostField, HostMethod, HostType, HostTypeKind, MethodAttribs, SlotId,
    TypeAttribs,
};
use crate::host::value::{HostFunctionId, HostTypeId, HostValue, UnitId};

/// Builder over an in-progress host type
pub struct HostTypeBuilder {
    engine: Arc<HostEngine>,
    id: HostTypeId,
}

impl HostTypeBuilder {
    /// Declare a type shell and return its builder. The returned handle is
    /// the final type id.
    #[allow(clippy::too_many_arguments)]
    pub fn declare(
        engine: &Arc<HostEngine>,
        name: String,
        attribs: TypeAttribs,
        unit: UnitId,
        base: Option<HostTypeId>,
        interfaces: Vec<HostTypeId>,
        enclosing: Option<HostTypeId>,
        foreign_modifiers: Option<Modifiers>,
    ) -> HostTypeBuilder {
        let is_interface = attribs.contains(TypeAttribs::INTERFACE);
        let id = engine.register_type(HostType {
            id: HostTypeId(0),
            name,
            attribs,
            kind: if is_interface {
                HostTypeKind::Interface
            } else {
                HostTypeKind::Class
            },
            unit,
            base,
            interfaces,
            enclosing,
            fields: Vec::new(),
            instance_field_start: 0,
            instance_field_total: 0,
            methods: Vec::new(),
            slot_bindings: FxHashMap::default(),
            clinit: None,
            foreign_modifiers,
            completed: false,
        });
        HostTypeBuilder {
            engine: engine.clone(),
            id,
        }
    }

    /// Re-open an existing builder shell.
    pub fn reopen(engine: &Arc<HostEngine>, id: HostTypeId) -> HostTypeBuilder {
        debug_assert!(!engine.with_type(id, |t| t.completed));
        HostTypeBuilder {
            engine: engine.clone(),
            id,
        }
    }

    /// The (stable) type handle.
    pub fn id(&self) -> HostTypeId {
        self.id
    }

    /// Define a field; returns its storage index.
    ///
    /// Instance indexes are relative to the declaring type; the absolute
    /// slot is `instance_field_start + index`, settled at completion
    /// (field layout cannot be final while the base is still a shell).
    pub fn define_field(
        &self,
        name: String,
        ty: HostTypeId,
        attribs: FieldAttribs,
        literal: Option<HostValue>,
        foreign_modifiers: Option<Modifiers>,
        foreign_type_note: Option<String>,
    ) -> u16 {
        self.engine.with_type_mut(self.id, |t| {
            let index = if attribs.contains(FieldAttribs::LITERAL) {
                // literals have no runtime storage
                u16::MAX
            } else if attribs.contains(FieldAttribs::STATIC) {
                t.static_field_count() as u16
            } else {
                t.fields
                    .iter()
                    .filter(|f| {
                        !f.attribs.contains(FieldAttribs::STATIC)
                            && !f.attribs.contains(FieldAttribs::LITERAL)
                    })
                    .count() as u16
            };
            t.fields.push(HostField {
                name,
                ty,
                attribs,
                literal,
                index,
                foreign_modifiers,
                foreign_type_note,
            });
            index
        })
    }

    /// Define a method with an abstract placeholder body; the body is
    /// attached later via the engine.
    ///
    /// A dispatched method either claims a fresh slot (`override_slot`
    /// `None`) or re-binds the given one.
    #[allow(clippy::too_many_arguments)]
    pub fn define_method(
        &self,
        name: String,
        sig: FnSig,
        attribs: MethodAttribs,
        override_slot: Option<SlotId>,
        native_key: Option<NativeKey>,
        foreign_modifiers: Option<Modifiers>,
    ) -> (HostFunctionId, Option<SlotId>) {
        let arity = sig.params.len() + 1;
        let function = self
            .engine
            .add_function(name.clone(), self.id, sig, attribs, native_key);
        let slot = if attribs.is_dispatched() {
            let slot = override_slot.unwrap_or_else(|| self.engine.new_slot());
            self.engine.record_slot_arity(slot, arity);
            Some(slot)
        } else {
            None
        };
        self.engine.with_type_mut(self.id, |t| {
            if let Some(slot) = slot {
                t.slot_bindings.insert(slot, function);
            }
            t.methods.push(HostMethod {
                name,
                function,
                attribs,
                slot,
                foreign_modifiers,
            });
        });
        (function, slot)
    }

    /// Bind a slot (interface or renamed base method) explicitly to a
    /// function of this type. Explicit bindings take precedence over
    /// natural conformance.
    pub fn define_explicit_override(&self, slot: SlotId, function: HostFunctionId) {
        self.engine.with_type_mut(self.id, |t| {
            t.slot_bindings.insert(slot, function);
        });
    }

    /// Add an interface to the implemented set (side-interface synthesis
    /// happens after declaration).
    pub fn add_interface(&self, iface: HostTypeId) {
        self.engine.with_type_mut(self.id, |t| {
            if !t.interfaces.contains(&iface) {
                t.interfaces.push(iface);
            }
        });
    }

    /// Set the class initializer.
    pub fn set_clinit(&self, function: HostFunctionId) {
        self.engine.with_type_mut(self.id, |t| {
            t.clinit = Some(function);
        });
    }

    /// Complete the type: settle the instance-field layout, compute
    /// natural interface conformance, and seal the record.
    pub fn complete(self) -> HostTypeId {
        let engine = &self.engine;
        let (unit, base, interfaces, is_interface) = engine.with_type(self.id, |t| {
            (t.unit, t.base, t.interfaces.clone(), t.is_interface())
        });
        // the base completed first (finish order guarantees it), so its
        // total is final
        let start = base
            .map(|b| engine.with_type(b, |t| t.instance_field_total))
            .unwrap_or(0);
        engine.with_type_mut(self.id, |t| {
            let own = t
                .fields
                .iter()
                .filter(|f| {
                    !f.attribs.contains(FieldAttribs::STATIC)
                        && !f.attribs.contains(FieldAttribs::LITERAL)
                })
                .count() as u16;
            t.instance_field_start = start;
            t.instance_field_total = start + own;
        });
        if !is_interface {
            // every interface slot in the transitive closure either has an
            // explicit binding already or gets the natural one computed here
            let mut ifaces = Vec::new();
            let mut seen = FxHashSet::default();
            let mut pending = interfaces;
            // include interfaces declared anywhere up the base chain; their
            // slots dispatch against this type too
            let mut cur = base;
            while let Some(b) = cur {
                engine.with_type(b, |t| pending.extend(t.interfaces.iter().copied()));
                cur = engine.with_type(b, |t| t.base);
            }
            while let Some(iface) = pending.pop() {
                if seen.insert(iface) {
                    ifaces.push(iface);
                    engine.with_type(iface, |t| pending.extend(t.interfaces.iter().copied()));
                }
            }
            for iface in ifaces {
                let slots = engine.with_type(iface, |t| {
                    t.methods
                        .iter()
                        .filter(|m| m.slot.is_some())
                        .map(|m| (m.slot.unwrap(), m.name.clone(), m.function))
                        .collect::<Vec<_>>()
                });
                for (slot, name, iface_fn) in slots {
                    let already = engine.with_type(self.id, |t| t.slot_bindings.contains_key(&slot));
                    if already {
                        continue;
                    }
                    let params = engine.function(iface_fn).sig.params.clone();
                    if let Some(found) = self.natural_conformance(unit, &name, &params) {
                        engine.with_type_mut(self.id, |t| {
                            t.slot_bindings.insert(slot, found);
                        });
                    }
                }
            }
        }
        engine.with_type_mut(self.id, |t| {
            t.completed = true;
        });
        self.id
    }

    /// A public, non-static method with matching name and parameters,
    /// declared here or inherited from a base in the same compilation
    /// unit.
    fn natural_conformance(
        &self,
        unit: UnitId,
        name: &str,
        params: &[HostTypeId],
    ) -> Option<HostFunctionId> {
        let engine = &self.engine;
        let mut cur = Some(self.id);
        while let Some(id) = cur {
            let same_unit = engine.with_type(id, |t| t.unit == unit);
            if !same_unit {
                return None;
            }
            let found = engine.with_type(id, |t| {
                for m in t.methods_named(name) {
                    if !m.attribs.contains(MethodAttribs::PUBLIC)
                        || m.attribs.contains(MethodAttribs::STATIC)
                    {
                        continue;
                    }
                    if engine.function(m.function).sig.params == params {
                        return Some(m.function);
                    }
                }
                None
            });
            if found.is_some() {
                return found;
            }
            cur = engine.with_type(id, |t| t.base);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::body::{Instr, MethodBody};
    use crate::host::engine::FunctionBody;

    fn declare_class(engine: &Arc<HostEngine>, name: &str, unit: UnitId) -> HostTypeBuilder {
        HostTypeBuilder::declare(
            engine,
            name.to_string(),
            TypeAttribs::PUBLIC,
            unit,
            Some(engine.object_type()),
            Vec::new(),
            None,
            None,
        )
    }

    fn emitted(code: Vec<Instr>) -> FunctionBody {
        FunctionBody::Emitted(Arc::new(MethodBody { code }))
    }

    #[test]
    fn test_field_index_assignment() {
        let engine = HostEngine::new();
        let b = declare_class(&engine, "demo.Fields", engine.new_unit());
        let int = engine.primitive_type(crate::host::value::PrimitiveKind::Int);
        let i0 = b.define_field("a".into(), int, FieldAttribs::PUBLIC, None, None, None);
        let i1 = b.define_field("b".into(), int, FieldAttribs::PUBLIC, None, None, None);
        let s0 = b.define_field(
            "c".into(),
            int,
            FieldAttribs::PUBLIC | FieldAttribs::STATIC,
            None,
            None,
            None,
        );
        assert_eq!((i0, i1, s0), (0, 1, 0));
        let lit = b.define_field(
            "d".into(),
            int,
            FieldAttribs::PUBLIC | FieldAttribs::STATIC | FieldAttribs::LITERAL,
            Some(HostValue::Int(9)),
            None,
            None,
        );
        assert_eq!(lit, u16::MAX);
    }

    #[test]
    fn test_fresh_slot_vs_override() {
        let engine = HostEngine::new();
        let unit = engine.new_unit();
        let base = declare_class(&engine, "demo.Base", unit);
        let sig = FnSig {
            params: Vec::new(),
            ret: None,
            is_static: false,
        };
        let (base_fn, base_slot) = base.define_method(
            "m".into(),
            sig.clone(),
            MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
            None,
            None,
            None,
        );
        let base_id = base.complete();

        let derived = HostTypeBuilder::declare(
            &engine,
            "demo.Derived".into(),
            TypeAttribs::PUBLIC,
            unit,
            Some(base_id),
            Vec::new(),
            None,
            None,
        );
        let (derived_fn, derived_slot) = derived.define_method(
            "m".into(),
            sig,
            MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
            base_slot,
            None,
            None,
        );
        let derived_id = derived.complete();

        assert_eq!(base_slot, derived_slot);
        assert_eq!(engine.resolve_slot(base_id, base_slot.unwrap()), Some(base_fn));
        assert_eq!(
            engine.resolve_slot(derived_id, base_slot.unwrap()),
            Some(derived_fn)
        );
    }

    #[test]
    fn test_natural_conformance_same_unit_only() {
        let engine = HostEngine::new();
        let unit_a = engine.new_unit();
        let unit_b = engine.new_unit();
        let sig = FnSig {
            params: Vec::new(),
            ret: None,
            is_static: false,
        };

        let iface = HostTypeBuilder::declare(
            &engine,
            "demo.IFace".into(),
            TypeAttribs::PUBLIC | TypeAttribs::INTERFACE | TypeAttribs::ABSTRACT,
            unit_a,
            None,
            Vec::new(),
            None,
            None,
        );
        let (_, iface_slot) = iface.define_method(
            "run".into(),
            sig.clone(),
            MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL | MethodAttribs::ABSTRACT,
            None,
            None,
            None,
        );
        let iface_id = iface.complete();

        // base declares a matching public method, in unit A
        let base = declare_class(&engine, "demo.Base", unit_a);
        let (base_fn, _) = base.define_method(
            "run".into(),
            sig.clone(),
            MethodAttribs::PUBLIC | MethodAttribs::VIRTUAL,
            None,
            None,
            None,
        );
        engine.set_function_body(base_fn, emitted(vec![Instr::Return]));
        let base_id = base.complete();

        // same-unit subclass: the inherited method satisfies the slot
        let same = HostTypeBuilder::declare(
            &engine,
            "demo.Same".into(),
            TypeAttribs::PUBLIC,
            unit_a,
            Some(base_id),
            vec![iface_id],
            None,
            None,
        );
        let same_id = same.complete();
        assert_eq!(
            engine.resolve_slot(same_id, iface_slot.unwrap()),
            Some(base_fn)
        );

        // cross-unit subclass: the inherited method does NOT satisfy it
        let cross = HostTypeBuilder::declare(
            &engine,
            "demo.Cross".into(),
            TypeAttribs::PUBLIC,
            unit_b,
            Some(base_id),
            vec![iface_id],
            None,
            None,
        );
        let cross_id = cross.complete();
        assert_eq!(engine.resolve_slot(cross_id, iface_slot.unwrap()), None);
    }
}
