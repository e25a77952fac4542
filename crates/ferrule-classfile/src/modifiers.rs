//! Foreign access-flag words

use bitflags::bitflags;

bitflags! {
    /// Access and property flags of a foreign class, field, or method.
    ///
    /// The numeric encoding is the foreign class-file encoding, so a parsed
    /// flag word can be used directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u16 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from the declaring class, its package, and subclasses
        const PROTECTED = 0x0004;
        /// Class-level member
        const STATIC = 0x0008;
        /// Not overridable / not assignable after initialization
        const FINAL = 0x0010;
        /// Method holds the receiver monitor for the duration of the call
        const SYNCHRONIZED = 0x0020;
        /// Field accesses have acquire/release semantics
        const VOLATILE = 0x0040;
        /// Field is excluded from serialized forms
        const TRANSIENT = 0x0080;
        /// Method body is provided by a native binding
        const NATIVE = 0x0100;
        /// Type is an interface
        const INTERFACE = 0x0200;
        /// Type or method has no concrete implementation
        const ABSTRACT = 0x0400;
        /// Member was generated, not declared in source
        const SYNTHETIC = 0x1000;
    }
}

impl Modifiers {
    /// Flag word repurposed to mark an unloadable placeholder wrapper.
    ///
    /// Exactly `SYNTHETIC` and nothing else; no real class carries this
    /// combination.
    pub const UNLOADABLE_MARKER: Modifiers = Modifiers::SYNTHETIC;

    /// Flag word repurposed to mark a verifier-only wrapper.
    ///
    /// Exactly `FINAL | INTERFACE`; illegal for a real class, so the
    /// combination is free to repurpose.
    pub const VERIFIER_MARKER: Modifiers =
        Modifiers::FINAL.union(Modifiers::INTERFACE);

    /// Public flag set?
    pub fn is_public(self) -> bool {
        self.contains(Modifiers::PUBLIC)
    }

    /// Private flag set?
    pub fn is_private(self) -> bool {
        self.contains(Modifiers::PRIVATE)
    }

    /// Protected flag set?
    pub fn is_protected(self) -> bool {
        self.contains(Modifiers::PROTECTED)
    }

    /// No visibility flag set (package-private)?
    pub fn is_package_private(self) -> bool {
        !self.intersects(Modifiers::PUBLIC | Modifiers::PRIVATE | Modifiers::PROTECTED)
    }

    /// Static flag set?
    pub fn is_static(self) -> bool {
        self.contains(Modifiers::STATIC)
    }

    /// Final flag set?
    pub fn is_final(self) -> bool {
        self.contains(Modifiers::FINAL)
    }

    /// Abstract flag set?
    pub fn is_abstract(self) -> bool {
        self.contains(Modifiers::ABSTRACT)
    }

    /// Interface flag set?
    pub fn is_interface(self) -> bool {
        self.contains(Modifiers::INTERFACE)
    }

    /// Native flag set?
    pub fn is_native(self) -> bool {
        self.contains(Modifiers::NATIVE)
    }

    /// Volatile flag set?
    pub fn is_volatile(self) -> bool {
        self.contains(Modifiers::VOLATILE)
    }

    /// Transient flag set?
    pub fn is_transient(self) -> bool {
        self.contains(Modifiers::TRANSIENT)
    }

    /// Synchronized flag set?
    pub fn is_synchronized(self) -> bool {
        self.contains(Modifiers::SYNCHRONIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_decoding() {
        let m = Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::FINAL;
        assert!(m.is_public());
        assert!(m.is_static());
        assert!(m.is_final());
        assert!(!m.is_private());
        assert!(!m.is_package_private());
    }

    #[test]
    fn test_package_private() {
        let m = Modifiers::STATIC;
        assert!(m.is_package_private());
        assert!(!(m | Modifiers::PROTECTED).is_package_private());
    }

    #[test]
    fn test_markers_are_distinct() {
        assert_ne!(Modifiers::UNLOADABLE_MARKER, Modifiers::VERIFIER_MARKER);
        assert_eq!(Modifiers::UNLOADABLE_MARKER, Modifiers::SYNTHETIC);
        assert!(Modifiers::VERIFIER_MARKER.is_final());
        assert!(Modifiers::VERIFIER_MARKER.is_interface());
    }
}
