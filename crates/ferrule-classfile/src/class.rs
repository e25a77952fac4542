//! Parsed foreign class records
//!
//! These are the records a class-file parser hands to the bridge: flag
//! words, names, member declarations with signatures and constant values,
//! and the nested-class relationship table. The parser itself is not part
//! of this crate; anything that can produce these records can feed the
//! engine.

use crate::modifiers::Modifiers;
use crate::signature::{split_method_sig, SigElem};
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Errors over class data shape
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassDataError {
    /// Inner-class name does not embed the outer name in `Outer$Inner` form
    #[error("inner class name {inner} is not well formed wrt outer class {outer}")]
    MalformedInnerName {
        /// Nested class name
        inner: String,
        /// Enclosing class name
        outer: String,
    },
}

/// A compile-time constant attached to a field declaration
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// int-family constant (boolean, byte, char, short, int)
    Int(i32),
    /// long constant
    Long(i64),
    /// float constant
    Float(f32),
    /// double constant
    Double(f64),
    /// string constant
    Str(String),
}

/// A declared field
#[derive(Debug, Clone)]
pub struct FieldData {
    /// Field name
    pub name: String,
    /// Field type signature (single element, e.g. `I` or `Lfoo/Bar;`)
    pub signature: String,
    /// Access flags
    pub modifiers: Modifiers,
    /// Compile-time constant, when the field has one
    pub constant: Option<ConstantValue>,
}

impl FieldData {
    /// Field with no constant value.
    pub fn new(name: impl Into<String>, signature: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            modifiers,
            constant: None,
        }
    }

    /// Attach a compile-time constant.
    pub fn with_constant(mut self, constant: ConstantValue) -> Self {
        self.constant = Some(constant);
        self
    }
}

/// A declared method, constructor (`<init>`), or static initializer
/// (`<clinit>`)
#[derive(Debug, Clone)]
pub struct MethodData {
    /// Method name
    pub name: String,
    /// Method signature, e.g. `(ILjava/lang/String;)V`
    pub signature: String,
    /// Access flags
    pub modifiers: Modifiers,
}

impl MethodData {
    /// New method record.
    pub fn new(name: impl Into<String>, signature: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            modifiers,
        }
    }

    /// Is this the instance-initializer name?
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Is this the static-initializer declaration?
    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>" && self.signature == "()V"
    }
}

/// One row of the nested-class relationship table
#[derive(Debug, Clone)]
pub struct InnerClassRel {
    /// Nested class name (slash-separated)
    pub inner: String,
    /// Enclosing class name (slash-separated)
    pub outer: String,
    /// Access flags of the nested class as declared at the nesting site
    pub access: Modifiers,
}

/// A parsed foreign class
#[derive(Debug, Clone)]
pub struct ClassData {
    /// Access flags
    pub modifiers: Modifiers,
    /// Class name (slash-separated)
    pub name: String,
    /// Superclass name; `None` only for the root class
    pub super_name: Option<String>,
    /// Directly implemented interface names
    pub interfaces: Vec<String>,
    /// Declared fields
    pub fields: Vec<FieldData>,
    /// Declared methods
    pub methods: Vec<MethodData>,
    /// Nested-class relationship table
    pub inner_classes: Vec<InnerClassRel>,
}

impl ClassData {
    /// Minimal class record with no members.
    pub fn new(name: impl Into<String>, modifiers: Modifiers, super_name: Option<String>) -> Self {
        Self {
            modifiers,
            name: name.into(),
            super_name,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
        }
    }

    /// The enclosing class of this one per the nested-class table, if any.
    pub fn outer_class(&self) -> Option<&InnerClassRel> {
        self.inner_classes.iter().find(|rel| rel.inner == self.name)
    }

    /// Names of classes directly nested inside this one.
    pub fn nested_class_names(&self) -> Vec<&str> {
        self.inner_classes
            .iter()
            .filter(|rel| rel.outer == self.name)
            .map(|rel| rel.inner.as_str())
            .collect()
    }

    /// Every class name referenced by this class: super, interfaces, and
    /// all classes appearing in field and method signatures.
    ///
    /// This is the input to the eager "load all referenced types" pass the
    /// emission engine runs before generating members.
    pub fn referenced_classes(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut add = |name: &str| {
            if seen.insert(name.to_string()) {
                out.push(name.to_string());
            }
        };
        if let Some(super_name) = &self.super_name {
            add(super_name);
        }
        for iface in &self.interfaces {
            add(iface);
        }
        let mut add_elem = |elem: &SigElem, add: &mut dyn FnMut(&str)| {
            if let Some(name) = elem.class_name() {
                add(name);
            }
        };
        for field in &self.fields {
            let mut pos_elem = None;
            // a field signature is a single element; reuse the method parser
            // by wrapping it in a throwaway method shape
            if let Ok((args, _)) = split_method_sig(&format!("({})V", field.signature)) {
                pos_elem = args.into_iter().next();
            }
            if let Some(elem) = pos_elem {
                add_elem(&elem, &mut add);
            }
        }
        for method in &self.methods {
            if let Ok((args, ret)) = split_method_sig(&method.signature) {
                for arg in &args {
                    add_elem(arg, &mut add);
                }
                add_elem(&ret, &mut add);
            }
        }
        out
    }
}

/// Simple name of a nested class, validating the `Outer$Inner` lexical
/// form.
pub fn inner_class_simple_name<'a>(
    outer: &str,
    inner: &'a str,
) -> Result<&'a str, ClassDataError> {
    let well_formed = inner.len() > outer.len() + 1
        && inner.as_bytes().get(outer.len()) == Some(&b'$')
        && inner.starts_with(outer)
        && !inner[outer.len() + 1..].contains('$');
    if !well_formed {
        return Err(ClassDataError::MalformedInnerName {
            inner: inner.to_string(),
            outer: outer.to_string(),
        });
    }
    Ok(&inner[outer.len() + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> ClassData {
        let mut class = ClassData::new(
            "demo/Point",
            Modifiers::PUBLIC,
            Some("java/lang/Object".to_string()),
        );
        class.interfaces.push("demo/Shape".to_string());
        class.fields.push(FieldData::new("x", "I", Modifiers::PRIVATE));
        class
            .fields
            .push(FieldData::new("label", "Ljava/lang/String;", Modifiers::PRIVATE));
        class.methods.push(MethodData::new(
            "translate",
            "(IILdemo/Delta;)Ldemo/Point;",
            Modifiers::PUBLIC,
        ));
        class
    }

    #[test]
    fn test_referenced_classes() {
        let class = sample_class();
        let refs = class.referenced_classes();
        assert!(refs.contains(&"java/lang/Object".to_string()));
        assert!(refs.contains(&"demo/Shape".to_string()));
        assert!(refs.contains(&"java/lang/String".to_string()));
        assert!(refs.contains(&"demo/Delta".to_string()));
        assert!(refs.contains(&"demo/Point".to_string()));
        // deduplicated
        let count = refs.iter().filter(|n| *n == "demo/Point").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_initializer_predicates() {
        let ctor = MethodData::new("<init>", "()V", Modifiers::PUBLIC);
        let clinit = MethodData::new("<clinit>", "()V", Modifiers::STATIC);
        assert!(ctor.is_constructor());
        assert!(!ctor.is_class_initializer());
        assert!(clinit.is_class_initializer());
    }

    #[test]
    fn test_inner_class_simple_name() {
        assert_eq!(inner_class_simple_name("demo/Outer", "demo/Outer$In").unwrap(), "In");
        assert!(inner_class_simple_name("demo/Outer", "demo/Outer$A$B").is_err());
        assert!(inner_class_simple_name("demo/Outer", "demo/Other$In").is_err());
        assert!(inner_class_simple_name("demo/Outer", "demo/Outer$").is_err());
    }

    #[test]
    fn test_outer_class_lookup() {
        let mut class = ClassData::new("demo/Outer$In", Modifiers::PUBLIC, None);
        class.inner_classes.push(InnerClassRel {
            inner: "demo/Outer$In".to_string(),
            outer: "demo/Outer".to_string(),
            access: Modifiers::PUBLIC,
        });
        assert_eq!(class.outer_class().unwrap().outer, "demo/Outer");
    }
}
