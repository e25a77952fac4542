//! Execution of emitted bodies
//!
//! A small stack interpreter over the glue instruction set. Bodies the
//! bridge synthesizes are straight-line: the only control transfer is the
//! type-tested dispatch instruction, which carries its own fallback.

use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::host::body::{Instr, MethodBody, ThrowKind};
use crate::host::engine::{FunctionBody, HostEngine, HostFunction, ObjectData};
use crate::host::ty::MethodAttribs;
use crate::host::value::{HostFunctionId, HostValue};

impl ThrowKind {
    fn to_error(self, detail: &str) -> BridgeError {
        match self {
            ThrowKind::AbstractMethod => BridgeError::AbstractMethodMissing(detail.to_string()),
            ThrowKind::IllegalAccess => BridgeError::IllegalAccess(detail.to_string()),
            ThrowKind::NativeMissing => BridgeError::NotImplemented(detail.to_string()),
        }
    }
}

impl HostEngine {
    /// Invoke a function with a fully formed argument list (the receiver
    /// of instance functions is argument 0).
    pub fn invoke_function(
        &self,
        id: HostFunctionId,
        args: Vec<HostValue>,
    ) -> BridgeResult<HostValue> {
        let function = self.function(id);
        let expected = self.total_arity(&function);
        if args.len() != expected {
            return Err(BridgeError::ArgumentShapeMismatch(format!(
                "{} expects {} arguments, got {}",
                function.name,
                expected,
                args.len()
            )));
        }
        let monitor = if function.attribs.contains(MethodAttribs::SYNCHRONIZED)
            && !function.sig.is_static
        {
            match args.first() {
                Some(HostValue::Object(r)) => Some(self.monitor_of(*r)),
                _ => None,
            }
        } else {
            None
        };
        let _guard = monitor.as_ref().map(|m| m.lock());
        let body = function.body.read().clone();
        match body {
            FunctionBody::Abstract => Err(BridgeError::AbstractMethodMissing(format!(
                "{}.{}",
                self.type_name(function.owner),
                function.name
            ))),
            FunctionBody::Native(f) => (f.as_ref())(self, &args),
            FunctionBody::Emitted(code) => self.execute_body(&code, &args, Some(&function)),
        }
    }

    /// Total argument count of a function including any receiver.
    pub fn total_arity(&self, function: &HostFunction) -> usize {
        function.sig.params.len() + usize::from(!function.sig.is_static)
    }

    /// Execute a body outside any function record (reflective thunks).
    pub fn run_thunk(&self, body: &MethodBody, args: &[HostValue]) -> BridgeResult<HostValue> {
        self.execute_body(body, args, None)
    }

    fn pop_call_args(stack: &mut Vec<HostValue>, count: usize) -> BridgeResult<Vec<HostValue>> {
        if stack.len() < count {
            return Err(BridgeError::IllegalState("call stack underflow".into()));
        }
        Ok(stack.split_off(stack.len() - count))
    }

    /// Resolve an instance field access to the object cell and the
    /// absolute slot (`instance_field_start` of the declaring type plus
    /// the declared index).
    fn instance_field(
        &self,
        receiver: &HostValue,
        owner: crate::host::value::HostTypeId,
        index: u16,
    ) -> BridgeResult<(Arc<parking_lot::Mutex<ObjectData>>, usize)> {
        match receiver {
            HostValue::Object(r) => {
                let start = self.with_type(owner, |t| t.instance_field_start) as usize;
                Ok((self.object(*r)?, start + index as usize))
            }
            HostValue::Null => Err(BridgeError::NullReference),
            other => Err(BridgeError::IllegalState(format!(
                "field access on non-object {other}"
            ))),
        }
    }

    pub(crate) fn execute_body(
        &self,
        body: &MethodBody,
        args: &[HostValue],
        current: Option<&HostFunction>,
    ) -> BridgeResult<HostValue> {
        let mut stack: Vec<HostValue> = Vec::new();
        for instr in &body.code {
            match instr {
                Instr::LoadArg(n) => {
                    let value = args.get(*n as usize).cloned().ok_or_else(|| {
                        BridgeError::IllegalState(format!("argument {n} out of range"))
                    })?;
                    stack.push(value);
                }
                Instr::LoadConst(v) => stack.push(v.clone()),
                Instr::Pop => {
                    stack.pop();
                }
                Instr::Dup => {
                    let top = stack
                        .last()
                        .cloned()
                        .ok_or_else(|| BridgeError::IllegalState("dup on empty stack".into()))?;
                    stack.push(top);
                }
                Instr::GetField { owner, index } => {
                    let receiver = stack.pop().ok_or(BridgeError::NullReference)?;
                    let (cell, idx) = self.instance_field(&receiver, *owner, *index)?;
                    let value = match &*cell.lock() {
                        ObjectData::Instance { fields, .. } => {
                            fields.get(idx).cloned().ok_or_else(|| {
                                BridgeError::IllegalState("field index out of range".into())
                            })?
                        }
                        ObjectData::Array { .. } => {
                            return Err(BridgeError::IllegalState(
                                "field access on array".into(),
                            ))
                        }
                    };
                    stack.push(value);
                }
                Instr::PutField { owner, index } => {
                    let value = stack.pop().ok_or(BridgeError::NullReference)?;
                    let receiver = stack.pop().ok_or(BridgeError::NullReference)?;
                    let (cell, idx) = self.instance_field(&receiver, *owner, *index)?;
                    match &mut *cell.lock() {
                        ObjectData::Instance { fields, .. } => {
                            if idx >= fields.len() {
                                return Err(BridgeError::IllegalState(
                                    "field index out of range".into(),
                                ));
                            }
                            fields[idx] = value;
                        }
                        ObjectData::Array { .. } => {
                            return Err(BridgeError::IllegalState(
                                "field access on array".into(),
                            ))
                        }
                    };
                }
                Instr::GetFieldVolatile { owner, index } => {
                    let receiver = stack.pop().ok_or(BridgeError::NullReference)?;
                    let r = match &receiver {
                        HostValue::Object(r) => *r,
                        HostValue::Null => return Err(BridgeError::NullReference),
                        _ => {
                            return Err(BridgeError::IllegalState(
                                "volatile access on non-object".into(),
                            ))
                        }
                    };
                    // 64-bit volatile reads are made atomic by holding
                    // the receiver monitor across the access
                    let monitor = self.monitor_of(r);
                    let _guard = monitor.lock();
                    let (cell, idx) = self.instance_field(&receiver, *owner, *index)?;
                    let value = match &*cell.lock() {
                        ObjectData::Instance { fields, .. } => {
                            fields.get(idx).cloned().ok_or_else(|| {
                                BridgeError::IllegalState("field index out of range".into())
                            })?
                        }
                        ObjectData::Array { .. } => {
                            return Err(BridgeError::IllegalState(
                                "field access on array".into(),
                            ))
                        }
                    };
                    stack.push(value);
                }
                Instr::PutFieldVolatile { owner, index } => {
                    let value = stack.pop().ok_or(BridgeError::NullReference)?;
                    let receiver = stack.pop().ok_or(BridgeError::NullReference)?;
                    let r = match &receiver {
                        HostValue::Object(r) => *r,
                        HostValue::Null => return Err(BridgeError::NullReference),
                        _ => {
                            return Err(BridgeError::IllegalState(
                                "volatile access on non-object".into(),
                            ))
                        }
                    };
                    let monitor = self.monitor_of(r);
                    let _guard = monitor.lock();
                    let (cell, idx) = self.instance_field(&receiver, *owner, *index)?;
                    match &mut *cell.lock() {
                        ObjectData::Instance { fields, .. } => {
                            if idx >= fields.len() {
                                return Err(BridgeError::IllegalState(
                                    "field index out of range".into(),
                                ));
                            }
                            fields[idx] = value;
                        }
                        ObjectData::Array { .. } => {
                            return Err(BridgeError::IllegalState(
                                "field access on array".into(),
                            ))
                        }
                    };
                }
                Instr::GetStatic { owner, index } => {
                    self.ensure_initialized(*owner)?;
                    stack.push(self.get_static(*owner, *index));
                }
                Instr::PutStatic { owner, index } => {
                    self.ensure_initialized(*owner)?;
                    let value = stack.pop().ok_or(BridgeError::NullReference)?;
                    self.put_static(*owner, *index, value);
                }
                Instr::CallDirect(f) => {
                    let function = self.function(*f);
                    let call_args = Self::pop_call_args(&mut stack, self.total_arity(&function))?;
                    let ret = self.invoke_function(*f, call_args)?;
                    if function.sig.ret.is_some() {
                        stack.push(ret);
                    }
                }
                Instr::CallVirtual(slot) => {
                    let arity = self.slot_arity(*slot)?;
                    let call_args = Self::pop_call_args(&mut stack, arity)?;
                    let receiver = match call_args.first() {
                        Some(HostValue::Object(r)) => *r,
                        Some(HostValue::Null) | None => return Err(BridgeError::NullReference),
                        Some(other) => {
                            return Err(BridgeError::IllegalState(format!(
                                "virtual call on non-object {other}"
                            )))
                        }
                    };
                    let ty = self.object_type_of(receiver)?;
                    let target = self.resolve_slot(ty, *slot).ok_or_else(|| {
                        BridgeError::AbstractMethodMissing(format!(
                            "no binding for slot on {}",
                            self.type_name(ty)
                        ))
                    })?;
                    let function = self.function(target);
                    let ret = self.invoke_function(target, call_args)?;
                    if function.sig.ret.is_some() {
                        stack.push(ret);
                    }
                }
                Instr::CallInterface(slot) => {
                    let arity = self.slot_arity(*slot)?;
                    let call_args = Self::pop_call_args(&mut stack, arity)?;
                    let receiver = match call_args.first() {
                        Some(HostValue::Object(r)) => *r,
                        _ => return Err(BridgeError::NullReference),
                    };
                    let ty = self.object_type_of(receiver)?;
                    let target = self.resolve_slot(ty, *slot).ok_or_else(|| {
                        BridgeError::AbstractMethodMissing(format!(
                            "no interface binding on {}",
                            self.type_name(ty)
                        ))
                    })?;
                    let function = self.function(target);
                    let ret = self.invoke_function(target, call_args)?;
                    if function.sig.ret.is_some() {
                        stack.push(ret);
                    }
                }
                Instr::DispatchVirtual {
                    iface,
                    slot,
                    fallback,
                } => {
                    let fallback_fn = self.function(*fallback);
                    let arity = self.total_arity(&fallback_fn).max(self.slot_arity(*slot)?);
                    let call_args = Self::pop_call_args(&mut stack, arity)?;
                    let conforming = match call_args.first() {
                        Some(HostValue::Object(r)) => {
                            let ty = self.object_type_of(*r)?;
                            if self.type_implements(ty, *iface) {
                                self.resolve_slot(ty, *slot)
                            } else {
                                None
                            }
                        }
                        _ => None,
                    };
                    let (target, pushes) = match conforming {
                        Some(f) => (f, self.function(f).sig.ret.is_some()),
                        None => (*fallback, fallback_fn.sig.ret.is_some()),
                    };
                    let ret = self.invoke_function(target, call_args)?;
                    if pushes {
                        stack.push(ret);
                    }
                }
                Instr::Construct(ctor) => {
                    let function = self.function(*ctor);
                    let param_count = function.sig.params.len();
                    let call_args = Self::pop_call_args(&mut stack, param_count)?;
                    self.ensure_initialized(function.owner)?;
                    let obj = self.allocate(function.owner)?;
                    let mut ctor_args = Vec::with_capacity(param_count + 1);
                    ctor_args.push(HostValue::Object(obj));
                    ctor_args.extend(call_args);
                    self.invoke_function(*ctor, ctor_args)?;
                    stack.push(HostValue::Object(obj));
                }
                Instr::New(ty) => {
                    self.ensure_initialized(*ty)?;
                    let obj = self.allocate(*ty)?;
                    stack.push(HostValue::Object(obj));
                }
                Instr::CastClass(ty) => {
                    let top = stack
                        .last()
                        .cloned()
                        .ok_or_else(|| BridgeError::IllegalState("cast on empty stack".into()))?;
                    match top {
                        HostValue::Null => {}
                        HostValue::Str(_) => {
                            if *ty != self.object_type() {
                                return Err(BridgeError::ClassCast(self.type_name(*ty)));
                            }
                        }
                        HostValue::Object(r) => {
                            let actual = self.object_type_of(r)?;
                            if !self.type_conforms(actual, *ty) {
                                return Err(BridgeError::ClassCast(format!(
                                    "{} is not a {}",
                                    self.type_name(actual),
                                    self.type_name(*ty)
                                )));
                            }
                        }
                        _ => return Err(BridgeError::ClassCast(self.type_name(*ty))),
                    }
                }
                // representation conversions; the uniform value carries
                // both shapes
                Instr::Box(_) | Instr::Unbox(_) => {}
                Instr::ArrayClone => {
                    let receiver = stack.pop().ok_or(BridgeError::NullReference)?;
                    let r = match receiver {
                        HostValue::Object(r) => r,
                        HostValue::Null => return Err(BridgeError::NullReference),
                        _ => return Err(BridgeError::IllegalState("clone on non-array".into())),
                    };
                    let (ty, elems) = match &*self.object(r)?.lock() {
                        ObjectData::Array { ty, elems } => (*ty, elems.clone()),
                        ObjectData::Instance { .. } => {
                            return Err(BridgeError::IllegalState("clone on non-array".into()))
                        }
                    };
                    let copy = self.allocate_array(ty, elems);
                    stack.push(HostValue::Object(copy));
                }
                Instr::RunClassInit(ty) => self.ensure_initialized(*ty)?,
                Instr::NativeInvoke => {
                    let function = current.ok_or_else(|| {
                        BridgeError::IllegalState("native trampoline outside a function".into())
                    })?;
                    let bound = function.native_cache.get_or_try_init(|| {
                        let key = function.native_key.as_ref().ok_or_else(|| {
                            BridgeError::IllegalState("native trampoline without key".into())
                        })?;
                        self.resolve_native(key).ok_or_else(|| {
                            BridgeError::NotImplemented(format!(
                                "unsatisfied native link: {}.{}{}",
                                key.class, key.name, key.sig
                            ))
                        })
                    })?;
                    return (bound.as_ref())(self, args);
                }
                Instr::Throw(kind, detail) => return Err(kind.to_error(detail)),
                Instr::Return => return Ok(HostValue::Null),
                Instr::ReturnValue => {
                    return stack
                        .pop()
                        .ok_or_else(|| BridgeError::IllegalState("return on empty stack".into()))
                }
            }
        }
        Ok(HostValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::engine::FnSig;
    use crate::host::value::PrimitiveKind;

    #[test]
    fn test_thunk_arithmetic_free_body() {
        let engine = HostEngine::new();
        let body = MethodBody {
            code: vec![Instr::LoadConst(HostValue::Int(7)), Instr::ReturnValue],
        };
        assert_eq!(engine.run_thunk(&body, &[]).unwrap(), HostValue::Int(7));
    }

    #[test]
    fn test_call_direct_returns_value() {
        let engine = HostEngine::new();
        let int = engine.primitive_type(PrimitiveKind::Int);
        let f = engine.add_function(
            "answer".into(),
            engine.object_type(),
            FnSig {
                params: vec![],
                ret: Some(int),
                is_static: true,
            },
            MethodAttribs::PUBLIC | MethodAttribs::STATIC,
            None,
        );
        engine.set_function_body(
            f,
            FunctionBody::Emitted(Arc::new(MethodBody {
                code: vec![Instr::LoadConst(HostValue::Int(42)), Instr::ReturnValue],
            })),
        );
        let body = MethodBody {
            code: vec![Instr::CallDirect(f), Instr::ReturnValue],
        };
        assert_eq!(engine.run_thunk(&body, &[]).unwrap(), HostValue::Int(42));
    }

    #[test]
    fn test_throw_surfaces_typed_error() {
        let engine = HostEngine::new();
        let body = MethodBody {
            code: vec![Instr::Throw(ThrowKind::AbstractMethod, "demo.M.run".into())],
        };
        let err = engine.run_thunk(&body, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::AbstractMethodMissing(_)));
    }

    #[test]
    fn test_array_clone_is_shallow_copy() {
        let engine = HostEngine::new();
        let int = engine.primitive_type(PrimitiveKind::Int);
        let arr_ty = engine.array_type_of(int);
        let arr = engine.allocate_array(arr_ty, vec![HostValue::Int(1), HostValue::Int(2)]);
        let body = MethodBody {
            code: vec![Instr::LoadArg(0), Instr::ArrayClone, Instr::ReturnValue],
        };
        let out = engine
            .run_thunk(&body, &[HostValue::Object(arr)])
            .unwrap();
        let copy = match out {
            HostValue::Object(r) => r,
            other => panic!("expected object, got {other}"),
        };
        assert_ne!(copy, arr);
        match &*engine.object(copy).unwrap().lock() {
            ObjectData::Array { elems, .. } => {
                assert_eq!(elems, &vec![HostValue::Int(1), HostValue::Int(2)])
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn test_cast_class() {
        let engine = HostEngine::new();
        let int_arr = engine.array_type_of(engine.primitive_type(PrimitiveKind::Int));
        let arr = engine.allocate_array(int_arr, vec![]);
        let ok = MethodBody {
            code: vec![
                Instr::LoadArg(0),
                Instr::CastClass(engine.object_type()),
                Instr::ReturnValue,
            ],
        };
        assert!(engine.run_thunk(&ok, &[HostValue::Object(arr)]).is_ok());
        let long_arr = engine.array_type_of(engine.primitive_type(PrimitiveKind::Long));
        let bad = MethodBody {
            code: vec![
                Instr::LoadArg(0),
                Instr::CastClass(long_arr),
                Instr::ReturnValue,
            ],
        };
        assert!(matches!(
            engine.run_thunk(&bad, &[HostValue::Object(arr)]),
            Err(BridgeError::ClassCast(_))
        ));
    }
}
