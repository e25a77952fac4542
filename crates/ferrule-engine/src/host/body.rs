//! Glue-level instruction set and method bodies
//!
//! The instruction set covers what the bridge itself synthesizes: member
//! access, the four call shapes, stub throws, and the representation
//! conversions between the two object models. Bodies produced by the
//! external bytecode compiler use the same sink.

use crate::host::ty::SlotId;
use crate::host::value::{HostFunctionId, HostTypeId, HostValue};

/// Foreign-equivalent error kind thrown by a synthesized stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowKind {
    /// A required concrete method has no implementation
    AbstractMethod,
    /// The naturally matching member is not accessible
    IllegalAccess,
    /// A native method has no binding
    NativeMissing,
}

/// One host instruction
#[derive(Debug, Clone)]
pub enum Instr {
    /// Push argument `n` (the receiver is argument 0 of instance bodies)
    LoadArg(u16),
    /// Push a constant
    LoadConst(HostValue),
    /// Discard the top of stack
    Pop,
    /// Duplicate the top of stack
    Dup,
    /// Read instance field `index` of `owner` from the popped receiver
    GetField {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// Write the popped value into instance field `index` of the popped
    /// receiver
    PutField {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// `GetField` holding the receiver monitor (atomic 64-bit volatile)
    GetFieldVolatile {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// `PutField` holding the receiver monitor (atomic 64-bit volatile)
    PutFieldVolatile {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// Read static field `index` of `owner`
    GetStatic {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// Write the popped value into static field `index` of `owner`
    PutStatic {
        /// Declaring type
        owner: HostTypeId,
        /// Declared field index
        index: u16,
    },
    /// Call a function directly (no dispatch); arguments, including any
    /// receiver, are on the stack
    CallDirect(HostFunctionId),
    /// Virtual dispatch through the receiver's slot binding
    CallVirtual(SlotId),
    /// Interface dispatch through the receiver's interface binding
    CallInterface(SlotId),
    /// Type-test the receiver against `iface`; dispatch through `slot`
    /// when it conforms, else call `fallback` with the same arguments.
    /// This is the entire body of a synthesized virtual-dispatch helper.
    DispatchVirtual {
        /// Synthesized side-interface
        iface: HostTypeId,
        /// Side-interface slot
        slot: SlotId,
        /// Non-virtual binding used when the receiver does not conform
        fallback: HostFunctionId,
    },
    /// Allocate an instance of the constructor's owner and run the
    /// constructor on the stacked arguments; pushes the new instance
    Construct(HostFunctionId),
    /// Allocate an uninitialized instance
    New(HostTypeId),
    /// Fail unless the popped-and-repushed reference is assignable to the
    /// type
    CastClass(HostTypeId),
    /// Convert a value-type value to its reference shape
    Box(HostTypeId),
    /// Convert a reference back to its value-type shape
    Unbox(HostTypeId),
    /// Shallow-copy the popped array, pushing the copy
    ArrayClone,
    /// Force the class initializer of a type to have run
    RunClassInit(HostTypeId),
    /// Invoke the externally bound native implementation of the current
    /// function, resolving and caching the binding on first use
    NativeInvoke,
    /// Throw a foreign-equivalent error
    Throw(ThrowKind, String),
    /// Return without a value
    Return,
    /// Return the top of stack
    ReturnValue,
}

/// An instruction sink: the body of one host function
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Instructions in execution order
    pub code: Vec<Instr>,
}

impl MethodBody {
    /// Empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction.
    pub fn push(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    /// Append `LoadArg` for arguments `0..count`.
    pub fn push_args(&mut self, count: u16) {
        for n in 0..count {
            self.code.push(Instr::LoadArg(n));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_args() {
        let mut body = MethodBody::new();
        body.push_args(3);
        assert_eq!(body.code.len(), 3);
        assert!(matches!(body.code[2], Instr::LoadArg(2)));
    }
}
