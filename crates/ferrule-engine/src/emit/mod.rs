//! Deferred code emission
//!
//! A `CodeEmitter` is a cheap, clonable unit of "emit these instructions
//! into a method body": the building block member wrappers carry for their
//! call, construct, and field-access strategies. Emitters compose
//! sequentially with [`CodeEmitter::then`]; emission happens when a body
//! is assembled, not when the emitter is built.

use std::sync::Arc;

use crate::host::body::{Instr, MethodBody, ThrowKind};
use crate::host::ty::SlotId;
use crate::host::value::{HostFunctionId, HostTypeId, HostValue};

enum EmitKind {
    Nop,
    One(Instr),
    Seq(CodeEmitter, CodeEmitter),
}

/// A deferred instruction-emission unit
#[derive(Clone)]
pub struct CodeEmitter {
    kind: Arc<EmitKind>,
}

impl CodeEmitter {
    fn of(kind: EmitKind) -> CodeEmitter {
        CodeEmitter {
            kind: Arc::new(kind),
        }
    }

    /// Emits nothing.
    pub fn nop() -> CodeEmitter {
        CodeEmitter::of(EmitKind::Nop)
    }

    /// Emits a single instruction.
    pub fn instr(instr: Instr) -> CodeEmitter {
        CodeEmitter::of(EmitKind::One(instr))
    }

    /// Pushes a constant.
    pub fn load_const(value: HostValue) -> CodeEmitter {
        CodeEmitter::instr(Instr::LoadConst(value))
    }

    /// Discards the top of stack.
    pub fn pop() -> CodeEmitter {
        CodeEmitter::instr(Instr::Pop)
    }

    /// Direct (non-dispatched) call.
    pub fn call(function: HostFunctionId) -> CodeEmitter {
        CodeEmitter::instr(Instr::CallDirect(function))
    }

    /// Virtual dispatch through a slot.
    pub fn call_virtual(slot: SlotId) -> CodeEmitter {
        CodeEmitter::instr(Instr::CallVirtual(slot))
    }

    /// Interface dispatch through a slot.
    pub fn call_interface(slot: SlotId) -> CodeEmitter {
        CodeEmitter::instr(Instr::CallInterface(slot))
    }

    /// Allocate-and-initialize through a constructor.
    pub fn construct(ctor: HostFunctionId) -> CodeEmitter {
        CodeEmitter::instr(Instr::Construct(ctor))
    }

    /// Instance field read.
    pub fn get_field(owner: HostTypeId, index: u16) -> CodeEmitter {
        CodeEmitter::instr(Instr::GetField { owner, index })
    }

    /// Instance field write.
    pub fn put_field(owner: HostTypeId, index: u16) -> CodeEmitter {
        CodeEmitter::instr(Instr::PutField { owner, index })
    }

    /// Static field read.
    pub fn get_static(owner: HostTypeId, index: u16) -> CodeEmitter {
        CodeEmitter::instr(Instr::GetStatic { owner, index })
    }

    /// Static field write.
    pub fn put_static(owner: HostTypeId, index: u16) -> CodeEmitter {
        CodeEmitter::instr(Instr::PutStatic { owner, index })
    }

    /// Runtime cast of the top of stack.
    pub fn cast(ty: HostTypeId) -> CodeEmitter {
        CodeEmitter::instr(Instr::CastClass(ty))
    }

    /// Value-to-reference shape conversion.
    pub fn box_value(ty: HostTypeId) -> CodeEmitter {
        CodeEmitter::instr(Instr::Box(ty))
    }

    /// Reference-to-value shape conversion.
    pub fn unbox_value(ty: HostTypeId) -> CodeEmitter {
        CodeEmitter::instr(Instr::Unbox(ty))
    }

    /// Shallow array copy.
    pub fn array_clone() -> CodeEmitter {
        CodeEmitter::instr(Instr::ArrayClone)
    }

    /// Foreign-equivalent throw.
    pub fn throw(kind: ThrowKind, detail: impl Into<String>) -> CodeEmitter {
        CodeEmitter::instr(Instr::Throw(kind, detail.into()))
    }

    /// Sequential composition: `self` emits first, then `next`.
    pub fn then(self, next: CodeEmitter) -> CodeEmitter {
        CodeEmitter::of(EmitKind::Seq(self, next))
    }

    /// Compose with an optional left-hand side; `None` means "just
    /// `right`". Mirrors how emission strategies accumulate adjustments.
    pub fn chain(left: Option<CodeEmitter>, right: CodeEmitter) -> CodeEmitter {
        match left {
            Some(left) => left.then(right),
            None => right,
        }
    }

    /// Walk the composition into an instruction sink.
    pub fn emit(&self, body: &mut MethodBody) {
        match &*self.kind {
            EmitKind::Nop => {}
            EmitKind::One(instr) => body.push(instr.clone()),
            EmitKind::Seq(left, right) => {
                left.emit(body);
                right.emit(body);
            }
        }
    }
}

impl std::fmt::Debug for CodeEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut body = MethodBody::new();
        self.emit(&mut body);
        write!(f, "CodeEmitter({} instrs)", body.code.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chaining_preserves_order() {
        let emitter = CodeEmitter::load_const(HostValue::Int(1))
            .then(CodeEmitter::load_const(HostValue::Int(2)))
            .then(CodeEmitter::pop());
        let mut body = MethodBody::new();
        emitter.emit(&mut body);
        assert_eq!(body.code.len(), 3);
        assert!(matches!(body.code[0], Instr::LoadConst(HostValue::Int(1))));
        assert!(matches!(body.code[2], Instr::Pop));
    }

    #[test]
    fn test_chain_with_empty_left() {
        let emitter = CodeEmitter::chain(None, CodeEmitter::pop());
        let mut body = MethodBody::new();
        emitter.emit(&mut body);
        assert_eq!(body.code.len(), 1);
    }

    #[test]
    fn test_nop_emits_nothing() {
        let emitter = CodeEmitter::nop().then(CodeEmitter::nop());
        let mut body = MethodBody::new();
        emitter.emit(&mut body);
        assert!(body.code.is_empty());
    }

    #[test]
    fn test_shared_emitter_is_reusable() {
        let shared = CodeEmitter::load_const(HostValue::Int(5));
        let a = shared.clone().then(CodeEmitter::pop());
        let b = shared.then(CodeEmitter::pop());
        let mut body_a = MethodBody::new();
        let mut body_b = MethodBody::new();
        a.emit(&mut body_a);
        b.emit(&mut body_b);
        assert_eq!(body_a.code.len(), body_b.code.len());
    }
}
