//! Icode interpreter for the quill VM.
//!
//! The loop is a trampoline: a script call links a fresh frame under the
//! current one and carries on decoding in it, a return hands the value to
//! the parent frame and switches back. Script calls never recurse on the
//! native stack; only native functions calling back through the invoker
//! start a nested [`run`].

use std::rc::Rc;

use quill_bytecode::opcode::{INCDEC_DECREMENT, INCDEC_POSTFIX};
use quill_bytecode::{CompiledUnit, HandlerKind, LiteralId, Op, RegExpLiteral};
use quill_runtime::object::{find_binding, lookup, outermost};
use quill_runtime::{
    ContinuationData, ErrorType, FunctionKind, GcPtr, JsObject, KeyEnumerator, NativeError,
    NativeFn, ObjectKind, ObjectRef, Value,
};
use tracing::{debug, trace, warn};

use crate::arith::{self, ArithOp};
use crate::continuation;
use crate::fault::{ContinuationJump, Fault, NativeFault};
use crate::frame::{thaw, CallFrame, Frame, LocalSlot, PendingCall};
use crate::Vm;

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

/// What the loop does once an instruction has run.
enum Outcome {
    Continue,
    /// The outermost frame of the invocation returned.
    Done(Value),
    /// Call out of the loop; the frame chain is parked meanwhile.
    Host(HostCall),
    /// `new Continuation()` in the current frame.
    Capture,
}

struct HostCall {
    target: HostTarget,
    this: Value,
    args: Vec<Value>,
    /// Receiver of a `new`, kept unless the callee returns an object.
    receiver: Option<ObjectRef>,
}

enum HostTarget {
    Native(NativeFn),
    /// An interpreted function from another security domain.
    Foreign(Value),
}

/// Index and string registers. Each holds a value only for the instruction
/// right after the one that loaded it.
#[derive(Default)]
struct Registers {
    index: Option<u32>,
    string: Option<Rc<str>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Call,
    Tail,
    Construct,
}

/// What a call instruction found in the callee slot.
enum Callee {
    Interpreted {
        unit: Rc<CompiledUnit>,
        scope: ObjectRef,
    },
    Native(NativeFn),
    CreateContinuation,
    Continuation(ContinuationData),
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run `frame` and everything it calls until its chain returns.
pub(crate) fn run(vm: &mut Vm, mut frame: Box<CallFrame>) -> Result<Value, Fault> {
    let mut regs = Registers::default();
    loop {
        let outcome = match step(vm, &mut frame, &mut regs) {
            Ok(outcome) => outcome,
            Err(fault) => unwind(vm, &mut frame, fault)?,
        };
        match outcome {
            Outcome::Continue => {}
            Outcome::Done(value) => return Ok(value),
            Outcome::Capture => frame = continuation::capture(frame),
            Outcome::Host(call) => {
                vm.suspended.push(frame);
                let result = call_host(vm, &call);
                frame = vm
                    .suspended
                    .pop()
                    .ok_or_else(|| invariant("suspended frame chain lost"))?;
                match result {
                    Ok(value) => frame.stack.push(construct_result(value, call.receiver)),
                    Err(error) => {
                        let fault = vm.call_fault(Some(&frame), error);
                        if let Outcome::Done(value) = unwind(vm, &mut frame, fault)? {
                            return Ok(value);
                        }
                    }
                }
            }
        }
    }
}

/// Call `function` from outside the loop: for the host, or for a native
/// function through the invoker.
pub(crate) fn call_value(
    vm: &mut Vm,
    function: &Value,
    this: &Value,
    args: &[Value],
) -> Result<Value, Fault> {
    let Some((object, callee)) = callee_of(function) else {
        let message = format!("{} is not a function", function.to_string_value());
        return Err(vm.native_fault(None, NativeError::type_error(message)));
    };
    match callee {
        Callee::Interpreted { unit, scope } => {
            let depth = vm.base_depth();
            if depth > vm.config.max_call_depth {
                return Err(too_much_recursion(vm, None));
            }
            let this = vm.bind_this(this.clone());
            let mut frame = Box::new(CallFrame::new(unit, Some(object), scope, this, depth));
            enter_frame(vm, &mut frame, args);
            run(vm, frame)
        }
        Callee::Native(native) => {
            vm.escaped = None;
            native(vm, this, args).map_err(|error| vm.call_fault(None, error))
        }
        Callee::CreateContinuation => {
            // Nothing script-level to capture from the host.
            let data = ContinuationData::default();
            Ok(Value::Object(GcPtr::new(JsObject::continuation(data))))
        }
        Callee::Continuation(data) => {
            let value = args.first().cloned().unwrap_or(Value::Undefined);
            match continuation::captured_frame(&data) {
                None => Ok(value),
                Some(target) => {
                    let frame = reenter(vm, target, None, value)?;
                    run(vm, frame)
                }
            }
        }
    }
}

/// Bind arguments and run entry hooks for a frame that has not started.
pub(crate) fn enter_frame(vm: &mut Vm, frame: &mut CallFrame, args: &[Value]) {
    let unit = frame.unit.clone();
    if unit.flags.top_level {
        let mut scope = frame.scope.borrow_mut();
        for name in unit.var_names.iter() {
            if !scope.has_property(name) {
                scope.set(name, Value::Undefined);
            }
        }
    } else if unit.flags.needs_activation {
        let mut activation = JsObject::scope(Some(frame.scope.clone()));
        for (i, name) in unit.var_names.iter().enumerate() {
            let value = match args.get(i) {
                Some(arg) if i < unit.param_count => arg.clone(),
                _ => Value::Undefined,
            };
            activation.set(name, value);
        }
        if let (Some(slot), Some(function)) = (unit.self_var, &frame.function) {
            if let Some(name) = unit.var_names.get(slot as usize) {
                activation.set(name, Value::Object(function.clone()));
            }
        }
        let activation = GcPtr::new(activation);
        frame.scope = activation.clone();
        frame.activation = Some(activation.clone());
        vm.activations.push(activation);
    } else {
        for (var, arg) in frame.vars.iter_mut().zip(args.iter().take(unit.param_count)) {
            *var = arg.clone();
        }
        if let (Some(slot), Some(function)) = (unit.self_var, &frame.function) {
            if let Some(var) = frame.vars.get_mut(slot as usize) {
                *var = Value::Object(function.clone());
            }
        }
    }

    trace!(function = unit.display_name(), depth = frame.depth, "enter frame");
    if let Some(hook) = vm.debug_hook.as_mut() {
        hook.on_enter(&unit, frame.depth);
    }
}

fn exit_frame(vm: &mut Vm, frame: &CallFrame, result: Option<&Value>) {
    if frame.activation.is_some() {
        vm.activations.pop();
    }
    trace!(
        function = frame.unit.display_name(),
        depth = frame.depth,
        "leave frame"
    );
    if let Some(hook) = vm.debug_hook.as_mut() {
        hook.on_exit(&frame.unit, frame.depth, result);
    }
}

/// Redo the entry effects of a captured frame a continuation re-enters.
fn replay_enter(vm: &mut Vm, frame: &CallFrame) {
    if let Some(activation) = &frame.activation {
        vm.activations.push(activation.clone());
    }
    if let Some(hook) = vm.debug_hook.as_mut() {
        hook.on_enter(&frame.unit, frame.depth);
    }
}

// ---------------------------------------------------------------------------
// Instruction dispatch
// ---------------------------------------------------------------------------

fn step(vm: &mut Vm, frame: &mut Box<CallFrame>, regs: &mut Registers) -> Result<Outcome, Fault> {
    let unit = frame.unit.clone();
    let pc = frame.pc;
    let Some(ins) = unit.decode(pc) else {
        return Err(bad_instruction(&unit, pc));
    };
    frame.pc = pc + ins.op.length();
    if vm.config.instruction_threshold.is_some() {
        vm.instruction_count += 1;
    }

    let index_reg = regs.index.take();
    let string_reg = regs.string.take();
    let operand = ins.operand;

    match ins.op {
        // ===== Control flow =====
        Op::Return => {
            let value = pop(frame)?;
            return leave(vm, frame, value);
        }
        Op::ReturnResult => {
            let value = std::mem::replace(&mut frame.result, Value::Undefined);
            return leave(vm, frame, value);
        }
        Op::ReturnUndef => return leave(vm, frame, Value::Undefined),
        Op::Goto => jump(vm, frame, pc, operand)?,
        Op::IfEq => {
            if !pop(frame)?.to_boolean() {
                jump(vm, frame, pc, operand)?;
            }
        }
        Op::IfNe => {
            if pop(frame)?.to_boolean() {
                jump(vm, frame, pc, operand)?;
            }
        }
        Op::IfEqPop => {
            if pop(frame)?.to_boolean() {
                pop(frame)?;
                jump(vm, frame, pc, operand)?;
            }
        }
        Op::Throw => {
            let value = pop(frame)?;
            return Err(Fault::Throw {
                value,
                trace: vm.trace(Some(frame)),
            });
        }
        Op::Gosub => {
            let local = need_index(index_reg)? as usize;
            let back = frame.pc;
            set_local(frame, local, LocalSlot::ReturnAddress(back))?;
            jump(vm, frame, pc, operand)?;
        }
        Op::RetSub => match std::mem::take(local_mut(frame, operand as usize)?) {
            LocalSlot::ReturnAddress(back) => frame.pc = back,
            LocalSlot::Pending(fault) => return Err(*fault),
            other => return Err(invariant(format!("RETSUB through {:?}", other))),
        },

        // ===== Calls =====
        Op::Call => return call(vm, frame, operand as usize, CallKind::Call),
        Op::TailCall => return call(vm, frame, operand as usize, CallKind::Tail),
        Op::New => return call(vm, frame, operand as usize, CallKind::Construct),
        Op::NameAndThis => {
            let name = need_string(string_reg)?;
            let callee = resolve_name(vm, frame, &name)?;
            frame.stack.push(callee);
            frame.stack.push(Value::Undefined);
        }
        Op::PropAndThis => {
            let name = need_string(string_reg)?;
            let object = pop(frame)?;
            let callee = object
                .get_member(&name)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(callee);
            frame.stack.push(object);
        }
        Op::ElemAndThis => {
            let key = pop(frame)?;
            let object = pop(frame)?;
            let callee = object
                .get_member(&key.to_js_string())
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(callee);
            frame.stack.push(object);
        }
        Op::ValueAndThis => {
            let callee = pop(frame)?;
            frame.stack.push(callee);
            frame.stack.push(Value::Undefined);
        }

        // ===== Closures =====
        Op::ClosureExpr => {
            let nested = nested_unit(&unit, index_reg)?;
            let closure = make_closure(&frame.scope, nested);
            frame.stack.push(closure);
        }
        Op::ClosureStmt => {
            let nested = nested_unit(&unit, index_reg)?;
            let name = nested.name.clone();
            let closure = make_closure(&frame.scope, nested);
            frame.scope.borrow_mut().set(&name, closure);
        }

        // ===== Names and variables =====
        Op::Name => {
            let name = need_string(string_reg)?;
            let value = resolve_name(vm, frame, &name)?;
            frame.stack.push(value);
        }
        Op::SetName => {
            let name = need_string(string_reg)?;
            let value = peek(frame)?.clone();
            let target = find_binding(&frame.scope, &name).unwrap_or_else(|| outermost(&frame.scope));
            target.borrow_mut().set(&name, value);
        }
        Op::TypeOfName => {
            let name = need_string(string_reg)?;
            let type_name = lookup(&frame.scope, &name).map_or("undefined", |v| v.type_of());
            frame.stack.push(Value::string(type_name));
        }
        Op::GetVar => {
            let value = var_mut(frame, need_index(index_reg)?)?.clone();
            frame.stack.push(value);
        }
        Op::GetVar1 => {
            let value = var_mut(frame, operand as u32)?.clone();
            frame.stack.push(value);
        }
        Op::SetVar => {
            let value = peek(frame)?.clone();
            *var_mut(frame, need_index(index_reg)?)? = value;
        }
        Op::SetVar1 => {
            let value = peek(frame)?.clone();
            *var_mut(frame, operand as u32)? = value;
        }
        Op::This => {
            let this = frame.this.clone();
            frame.stack.push(this);
        }

        // ===== Frame locals and scopes =====
        Op::LocalLoad => {
            let value = match local_mut(frame, operand as usize)? {
                LocalSlot::Value(value) => value.clone(),
                _ => Value::Undefined,
            };
            frame.stack.push(value);
        }
        Op::LocalClear => set_local(frame, operand as usize, LocalSlot::Empty)?,
        Op::ScopeSave => {
            let scope = frame.scope.clone();
            set_local(frame, operand as usize, LocalSlot::Scope(scope))?;
        }
        Op::ScopeLoad => {
            let scope = match local_mut(frame, operand as usize)? {
                LocalSlot::Scope(scope) => scope.clone(),
                other => return Err(invariant(format!("SCOPE_LOAD from {:?}", other))),
            };
            frame.scope = scope;
        }
        Op::CatchScope => {
            let name = need_string(string_reg)?;
            let value = pop(frame)?;
            let mut scope = JsObject::scope(Some(frame.scope.clone()));
            scope.set(&name, value);
            frame.scope = GcPtr::new(scope);
        }

        // ===== for-in =====
        Op::EnumInit => {
            let object = pop(frame)?;
            let keys = KeyEnumerator::new(object.enumerable_keys());
            set_local(frame, operand as usize, LocalSlot::Enumerator(keys))?;
        }
        Op::EnumNext => {
            let more = match local_mut(frame, operand as usize)? {
                LocalSlot::Enumerator(keys) => keys.advance(),
                other => return Err(invariant(format!("ENUM_NEXT on {:?}", other))),
            };
            frame.stack.push(Value::Boolean(more));
        }
        Op::EnumId => {
            let key = match local_mut(frame, operand as usize)? {
                LocalSlot::Enumerator(keys) => keys.current(),
                other => return Err(invariant(format!("ENUM_ID on {:?}", other))),
            };
            frame.stack.push(key);
        }

        // ===== Literals =====
        Op::Undef => frame.stack.push(Value::Undefined),
        Op::Null => frame.stack.push(Value::Null),
        Op::True => frame.stack.push(Value::Boolean(true)),
        Op::False => frame.stack.push(Value::Boolean(false)),
        Op::Zero => frame.stack.push(Value::Number(0.0)),
        Op::One => frame.stack.push(Value::Number(1.0)),
        Op::ShortNumber | Op::IntNumber => frame.stack.push(Value::Number(operand as f64)),
        Op::Number => {
            let index = need_index(index_reg)? as usize;
            let value = unit
                .doubles
                .get(index)
                .copied()
                .ok_or_else(|| table_miss("double", index))?;
            frame.stack.push(Value::Number(value));
        }
        Op::String => {
            let text = need_string(string_reg)?;
            frame.stack.push(Value::String(text));
        }
        Op::RegExp => {
            let index = need_index(index_reg)? as usize;
            let literal = unit
                .regexps
                .get(index)
                .ok_or_else(|| table_miss("regexp", index))?;
            frame.stack.push(regexp_object(literal));
        }
        Op::LiteralNew => {
            let count = need_index(index_reg)? as usize;
            let buffer = JsObject::array(Vec::with_capacity(count));
            frame.stack.push(Value::Object(GcPtr::new(buffer)));
        }
        Op::LiteralSet => {
            let value = pop(frame)?;
            let buffer = literal_buffer(peek(frame)?)?;
            let mut buffer = buffer.borrow_mut();
            if let Some(elements) = buffer.as_array_mut() {
                elements.push(value);
            }
        }
        Op::ArrayLit => {
            literal_buffer(peek(frame)?)?;
        }
        Op::SparseArrayLit => {
            let index = need_index(index_reg)? as usize;
            let Some(LiteralId::SkipIndices { holes, length }) = unit.literal_ids.get(index) else {
                return Err(table_miss("skip-index literal", index));
            };
            let buffer = literal_buffer(peek(frame)?)?;
            let mut buffer = buffer.borrow_mut();
            if let Some(elements) = buffer.as_array_mut() {
                let mut given = std::mem::take(elements).into_iter();
                *elements = (0..*length)
                    .map(|i| {
                        if holes.contains(&i) {
                            Value::Undefined
                        } else {
                            given.next().unwrap_or(Value::Undefined)
                        }
                    })
                    .collect();
            }
        }
        Op::ObjectLit => {
            let index = need_index(index_reg)? as usize;
            let Some(LiteralId::PropertyNames(names)) = unit.literal_ids.get(index) else {
                return Err(table_miss("property-name literal", index));
            };
            let buffer = literal_buffer(&pop(frame)?)?;
            let values = buffer
                .borrow_mut()
                .as_array_mut()
                .map(std::mem::take)
                .unwrap_or_default();
            let mut object = JsObject::ordinary();
            for (name, value) in names.iter().zip(values) {
                object.set(name, value);
            }
            frame.stack.push(Value::Object(GcPtr::new(object)));
        }

        // ===== Stack shuffles =====
        Op::Dup => {
            let top = peek(frame)?.clone();
            frame.stack.push(top);
        }
        Op::Dup2 => {
            let len = frame.stack.len();
            if len < 2 {
                return Err(stack_underflow(frame));
            }
            frame.stack.extend_from_within(len - 2..);
        }
        Op::Swap => {
            let len = frame.stack.len();
            if len < 2 {
                return Err(stack_underflow(frame));
            }
            frame.stack.swap(len - 1, len - 2);
        }
        Op::Pop => {
            pop(frame)?;
        }
        Op::PopResult => frame.result = pop(frame)?,

        // ===== Operators =====
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
            let rhs = pop(frame)?;
            let lhs = pop(frame)?;
            let op = ArithOp::from_op(ins.op).ok_or_else(|| invariant("not arithmetic"))?;
            frame.stack.push(arith::binary(op, &lhs, &rhs));
        }
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let rhs = pop(frame)?;
            let lhs = pop(frame)?;
            let result = arith::relational(ins.op, &lhs, &rhs)
                .ok_or_else(|| invariant("not relational"))?;
            frame.stack.push(Value::Boolean(result));
        }
        Op::Eq | Op::Ne | Op::ShEq | Op::ShNe => {
            let rhs = pop(frame)?;
            let lhs = pop(frame)?;
            let result = match ins.op {
                Op::Eq => lhs.loose_eq(&rhs),
                Op::Ne => !lhs.loose_eq(&rhs),
                Op::ShEq => lhs.strict_eq(&rhs),
                _ => !lhs.strict_eq(&rhs),
            };
            frame.stack.push(Value::Boolean(result));
        }
        Op::BitAnd | Op::BitOr | Op::BitXor | Op::Lsh | Op::Rsh | Op::Ursh => {
            let rhs = pop(frame)?;
            let lhs = pop(frame)?;
            let result = match ins.op {
                Op::BitAnd => lhs.bitand(&rhs),
                Op::BitOr => lhs.bitor(&rhs),
                Op::BitXor => lhs.bitxor(&rhs),
                Op::Lsh => lhs.shl(&rhs),
                Op::Rsh => lhs.shr(&rhs),
                _ => lhs.ushr(&rhs),
            };
            frame.stack.push(result);
        }
        Op::Not | Op::BitNot | Op::Pos | Op::Neg | Op::TypeOf => {
            let value = pop(frame)?;
            let result = match ins.op {
                Op::Not => value.logical_not(),
                Op::BitNot => value.bitnot(),
                Op::Pos => value.pos(),
                Op::Neg => value.neg(),
                _ => Value::string(value.type_of()),
            };
            frame.stack.push(result);
        }
        Op::In => {
            let object = pop(frame)?;
            let key = pop(frame)?;
            let found = object
                .has_member(&key)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(Value::Boolean(found));
        }
        Op::InstanceOf => {
            let constructor = pop(frame)?;
            let value = pop(frame)?;
            let result = value
                .instance_of(&constructor)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(Value::Boolean(result));
        }

        // ===== Properties =====
        Op::GetProp => {
            let name = need_string(string_reg)?;
            let object = pop(frame)?;
            let value = object
                .get_member(&name)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(value);
        }
        Op::SetProp => {
            let name = need_string(string_reg)?;
            let value = pop(frame)?;
            let object = pop(frame)?;
            object
                .set_member(&name, value.clone())
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(value);
        }
        Op::GetElem => {
            let key = pop(frame)?;
            let object = pop(frame)?;
            let value = object
                .get_member(&key.to_js_string())
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(value);
        }
        Op::SetElem => {
            let value = pop(frame)?;
            let key = pop(frame)?;
            let object = pop(frame)?;
            object
                .set_member(&key.to_js_string(), value.clone())
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(value);
        }
        Op::DelProp => {
            let key = pop(frame)?;
            let object = pop(frame)?;
            let deleted = object
                .delete_member(&key.to_js_string())
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(Value::Boolean(deleted));
        }

        // ===== Increment / decrement =====
        Op::VarIncDec => {
            let var = var_mut(frame, need_index(index_reg)?)?;
            let (updated, result) = inc_dec(var.to_number(), operand);
            *var = updated;
            frame.stack.push(result);
        }
        Op::NameIncDec => {
            let name = need_string(string_reg)?;
            let Some(target) = find_binding(&frame.scope, &name) else {
                return Err(not_defined(vm, frame, &name));
            };
            let old = target.borrow().get(&name).unwrap_or(Value::Undefined);
            let (updated, result) = inc_dec(old.to_number(), operand);
            target.borrow_mut().set(&name, updated);
            frame.stack.push(result);
        }
        Op::PropIncDec => {
            let name = need_string(string_reg)?;
            let object = pop(frame)?;
            let result = member_inc_dec(&object, &name, operand)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(result);
        }
        Op::ElemIncDec => {
            let key = pop(frame)?;
            let object = pop(frame)?;
            let result = member_inc_dec(&object, &key.to_js_string(), operand)
                .map_err(|e| vm.native_fault(Some(frame), e))?;
            frame.stack.push(result);
        }
        Op::RefIncDec => {
            pop(frame)?;
            let error = NativeError::reference_error("invalid increment/decrement operand");
            return Err(vm.native_fault(Some(frame), error));
        }

        // ===== Registers =====
        Op::RegIndC0 => regs.index = Some(0),
        Op::RegIndC1 => regs.index = Some(1),
        Op::RegIndC2 => regs.index = Some(2),
        Op::RegIndC3 => regs.index = Some(3),
        Op::RegIndC4 => regs.index = Some(4),
        Op::RegIndC5 => regs.index = Some(5),
        Op::RegInd1 | Op::RegInd2 | Op::RegInd4 => regs.index = Some(operand as u32),
        Op::RegStrC0 => regs.string = Some(string_at(&unit, 0)?),
        Op::RegStrC1 => regs.string = Some(string_at(&unit, 1)?),
        Op::RegStrC2 => regs.string = Some(string_at(&unit, 2)?),
        Op::RegStrC3 => regs.string = Some(string_at(&unit, 3)?),
        Op::RegStrC4 => regs.string = Some(string_at(&unit, 4)?),
        Op::RegStrC5 => regs.string = Some(string_at(&unit, 5)?),
        Op::RegStr1 | Op::RegStr2 | Op::RegStr4 => {
            regs.string = Some(string_at(&unit, operand as usize)?)
        }

        Op::Line => {
            if let Some(hook) = vm.debug_hook.as_mut() {
                hook.on_line(&unit, operand as u32);
            }
        }
    }

    Ok(Outcome::Continue)
}

// ---------------------------------------------------------------------------
// Calls and returns
// ---------------------------------------------------------------------------

fn callee_of(value: &Value) -> Option<(ObjectRef, Callee)> {
    let Value::Object(object) = value else {
        return None;
    };
    let callee = match &object.borrow().kind {
        ObjectKind::Function(function) => match &function.kind {
            FunctionKind::Interpreted { unit, scope } => Callee::Interpreted {
                unit: unit.clone(),
                scope: scope.clone(),
            },
            FunctionKind::Native(native) => Callee::Native(*native),
            FunctionKind::ContinuationConstructor => Callee::CreateContinuation,
        },
        ObjectKind::Continuation(data) => Callee::Continuation(data.clone()),
        _ => return None,
    };
    Some((object.clone(), callee))
}

fn call(
    vm: &mut Vm,
    frame: &mut Box<CallFrame>,
    argc: usize,
    kind: CallKind,
) -> Result<Outcome, Fault> {
    let split = frame
        .stack
        .len()
        .checked_sub(argc)
        .ok_or_else(|| stack_underflow(frame))?;
    let args = frame.stack.split_off(split);
    let this = match kind {
        CallKind::Construct => Value::Undefined,
        _ => pop(frame)?,
    };
    let function = pop(frame)?;
    check_budget(vm)?;

    let Some((object, callee)) = callee_of(&function) else {
        let what = match kind {
            CallKind::Construct => "a constructor",
            _ => "a function",
        };
        let message = format!("{} is not {}", function.to_string_value(), what);
        return Err(vm.native_fault(Some(frame), NativeError::type_error(message)));
    };

    match callee {
        Callee::Interpreted { unit, scope }
            if unit.security_domain == frame.unit.security_domain =>
        {
            let depth = match kind {
                CallKind::Tail => frame.depth,
                _ => frame.depth + 1,
            };
            if depth > vm.config.max_call_depth {
                return Err(too_much_recursion(vm, Some(frame)));
            }
            let receiver = (kind == CallKind::Construct).then(|| new_receiver(&object));
            let this = match &receiver {
                Some(receiver) => Value::Object(receiver.clone()),
                None => vm.bind_this(this),
            };
            let scope = if unit.flags.dynamic_scope {
                frame.scope.clone()
            } else {
                scope
            };
            let mut callee_frame = Box::new(CallFrame::new(unit, Some(object), scope, this, depth));

            if kind == CallKind::Tail {
                exit_frame(vm, frame, None);
                enter_frame(vm, &mut callee_frame, &args);
                callee_frame.parent = frame.parent.take();
                *frame = callee_frame;
            } else {
                enter_frame(vm, &mut callee_frame, &args);
                frame.pending = match receiver {
                    Some(receiver) => PendingCall::Construct(receiver),
                    None => PendingCall::Call,
                };
                let caller = std::mem::replace(frame, callee_frame);
                frame.parent = Some(Frame::Owned(caller));
            }
            Ok(Outcome::Continue)
        }
        Callee::Interpreted { .. } => {
            let receiver = (kind == CallKind::Construct).then(|| new_receiver(&object));
            let this = receiver.clone().map(Value::Object).unwrap_or(this);
            Ok(Outcome::Host(HostCall {
                target: HostTarget::Foreign(function),
                this,
                args,
                receiver,
            }))
        }
        Callee::Native(native) => {
            let receiver = (kind == CallKind::Construct).then(|| new_receiver(&object));
            let this = receiver.clone().map(Value::Object).unwrap_or(this);
            Ok(Outcome::Host(HostCall {
                target: HostTarget::Native(native),
                this,
                args,
                receiver,
            }))
        }
        Callee::CreateContinuation => Ok(Outcome::Capture),
        Callee::Continuation(data) => {
            let value = args.into_iter().next().unwrap_or(Value::Undefined);
            let Some(target) = continuation::captured_frame(&data) else {
                frame.stack.push(value);
                return Ok(Outcome::Continue);
            };
            let branch = continuation::branch_point(frame, &target).map_err(Fault::Native)?;
            debug!(
                target = target.unit.display_name(),
                detached = branch.is_none(),
                "continuation jump"
            );
            Err(Fault::Jump(ContinuationJump {
                target: Some(target),
                branch,
                result: value,
            }))
        }
    }
}

fn call_host(vm: &mut Vm, call: &HostCall) -> Result<Value, NativeError> {
    vm.escaped = None;
    match &call.target {
        HostTarget::Native(native) => native(vm, &call.this, &call.args),
        HostTarget::Foreign(function) => {
            quill_runtime::Invoker::call(vm, function, &call.this, &call.args)
        }
    }
}

fn construct_result(value: Value, receiver: Option<ObjectRef>) -> Value {
    match receiver {
        Some(receiver) if !value.is_object() => Value::Object(receiver),
        _ => value,
    }
}

/// Fresh object whose prototype is the constructor's `prototype`.
fn new_receiver(constructor: &ObjectRef) -> ObjectRef {
    let prototype = match constructor.borrow().get("prototype") {
        Some(Value::Object(prototype)) => Some(prototype),
        _ => None,
    };
    GcPtr::new(JsObject::with_prototype(prototype))
}

/// Leave the current frame with `value`.
fn leave(vm: &mut Vm, frame: &mut Box<CallFrame>, value: Value) -> Result<Outcome, Fault> {
    exit_frame(vm, frame, Some(&value));
    let Some(parent) = frame.parent.take() else {
        return Ok(Outcome::Done(value));
    };
    let mut parent = parent.into_owned();
    let value = match std::mem::take(&mut parent.pending) {
        PendingCall::Construct(receiver) => construct_result(value, Some(receiver)),
        _ => value,
    };
    parent.stack.push(value);
    *frame = parent;
    Ok(Outcome::Continue)
}

// ---------------------------------------------------------------------------
// Fault dispatch
// ---------------------------------------------------------------------------

/// Hand `fault` to the innermost handler that may take it, tearing frames
/// down until one is found.
fn unwind(vm: &mut Vm, frame: &mut Box<CallFrame>, mut fault: Fault) -> Result<Outcome, Fault> {
    if let Fault::Native(native) = &fault {
        warn!(fault = %native, "native fault, abandoning the invocation");
    }
    loop {
        if fault.searches_handlers() {
            let pc = frame.pc.saturating_sub(1);
            if let Some(handler) = frame.unit.find_handler(pc, !fault.is_catchable()).copied() {
                debug!(
                    function = frame.unit.display_name(),
                    fault = fault.class_name(),
                    kind = ?handler.kind,
                    entry = handler.handler,
                    "dispatching to handler"
                );
                if let Some(LocalSlot::Scope(scope)) = frame.locals.get(handler.scope_local as usize) {
                    frame.scope = scope.clone();
                }
                let slot = match handler.kind {
                    HandlerKind::Catch => {
                        LocalSlot::Value(fault.caught_value().cloned().unwrap_or(Value::Undefined))
                    }
                    HandlerKind::Finally => LocalSlot::Pending(Box::new(fault)),
                };
                set_local(frame, handler.exception_local as usize, slot)?;
                frame.stack.clear();
                frame.pc = handler.handler as usize;
                return Ok(Outcome::Continue);
            }
        }

        exit_frame(vm, frame, None);
        let Some(parent) = frame.parent.take() else {
            return match fault {
                // Nothing of the captured chain is live: restart it here.
                Fault::Jump(jump) => resume(vm, frame, jump),
                fault => Err(fault),
            };
        };
        match fault {
            Fault::Jump(jump) if jump.branch_ptr() == Some(parent.ptr()) => {
                return resume(vm, frame, jump);
            }
            other => {
                fault = other;
                *frame = parent.into_owned();
            }
        }
    }
}

/// Continue in the captured frame of `jump`.
fn resume(vm: &mut Vm, frame: &mut Box<CallFrame>, jump: ContinuationJump) -> Result<Outcome, Fault> {
    let Some(target) = jump.target else {
        return Ok(Outcome::Done(jump.result));
    };
    *frame = reenter(vm, target, jump.branch.as_ref(), jump.result)?;
    Ok(Outcome::Continue)
}

/// Replay entry effects of the captured frames below `branch`, root first,
/// and return a live copy of `target` holding `result` as its call result.
fn reenter(
    vm: &mut Vm,
    target: Rc<CallFrame>,
    branch: Option<&Rc<CallFrame>>,
    result: Value,
) -> Result<Box<CallFrame>, Fault> {
    let path = continuation::reentry_path(&target, branch).map_err(Fault::Native)?;
    for captured in &path {
        replay_enter(vm, captured);
    }
    drop(path);
    debug!(
        function = target.unit.display_name(),
        depth = target.depth,
        detached = branch.is_none(),
        "continuation resumed"
    );
    let mut resumed = thaw(target);
    resumed.stack.push(result);
    Ok(resumed)
}

/// Called at backward branches and calls.
fn check_budget(vm: &mut Vm) -> Result<(), Fault> {
    let Some(threshold) = vm.config.instruction_threshold else {
        return Ok(());
    };
    if vm.instruction_count < threshold {
        return Ok(());
    }
    let executed = vm.instruction_count;
    let verdict = match vm.observer.as_mut() {
        Some(observer) => observer.budget_exhausted(executed),
        None => Err(format!("instruction budget of {} exhausted", threshold)),
    };
    match verdict {
        Ok(()) => {
            vm.instruction_count = 0;
            Ok(())
        }
        Err(reason) => {
            warn!(executed, %reason, "interrupting script");
            Err(Fault::Native(NativeFault::Interrupted(reason)))
        }
    }
}

fn jump(vm: &mut Vm, frame: &mut CallFrame, from: usize, target: i64) -> Result<(), Fault> {
    let target = usize::try_from(target).map_err(|_| invariant("negative jump target"))?;
    if target <= from {
        check_budget(vm)?;
    }
    frame.pc = target;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn invariant(message: impl Into<String>) -> Fault {
    Fault::Native(NativeFault::Invariant(message.into()))
}

fn bad_instruction(unit: &CompiledUnit, pc: usize) -> Fault {
    match unit.read_u8(pc) {
        None => invariant(format!("ran off the end of '{}'", unit.display_name())),
        Some(byte) => Fault::Native(NativeFault::BadOpcode {
            byte,
            pc,
            unit: unit.display_name().to_string(),
        }),
    }
}

fn stack_underflow(frame: &CallFrame) -> Fault {
    invariant(format!(
        "operand stack underflow in '{}' at pc {}",
        frame.unit.display_name(),
        frame.pc
    ))
}

fn table_miss(table: &str, index: usize) -> Fault {
    invariant(format!("{} table has no entry {}", table, index))
}

fn too_much_recursion(vm: &Vm, frame: Option<&CallFrame>) -> Fault {
    warn!(limit = vm.config.max_call_depth, "call depth limit reached");
    vm.native_fault(
        frame,
        NativeError::typed(ErrorType::InternalError, "too much recursion"),
    )
}

fn not_defined(vm: &Vm, frame: &CallFrame, name: &str) -> Fault {
    let error = NativeError::reference_error(format!("{} is not defined", name));
    vm.native_fault(Some(frame), error)
}

fn resolve_name(vm: &Vm, frame: &CallFrame, name: &str) -> Result<Value, Fault> {
    lookup(&frame.scope, name).ok_or_else(|| not_defined(vm, frame, name))
}

fn pop(frame: &mut CallFrame) -> Result<Value, Fault> {
    match frame.stack.pop() {
        Some(value) => Ok(value),
        None => Err(stack_underflow(frame)),
    }
}

fn peek(frame: &CallFrame) -> Result<&Value, Fault> {
    frame.stack.last().ok_or_else(|| stack_underflow(frame))
}

fn need_index(register: Option<u32>) -> Result<u32, Fault> {
    register.ok_or_else(|| invariant("index register not loaded"))
}

fn need_string(register: Option<Rc<str>>) -> Result<Rc<str>, Fault> {
    register.ok_or_else(|| invariant("string register not loaded"))
}

fn string_at(unit: &CompiledUnit, index: usize) -> Result<Rc<str>, Fault> {
    unit.strings
        .get(index)
        .cloned()
        .ok_or_else(|| table_miss("string", index))
}

fn nested_unit(unit: &CompiledUnit, register: Option<u32>) -> Result<Rc<CompiledUnit>, Fault> {
    let index = need_index(register)? as usize;
    unit.nested
        .get(index)
        .cloned()
        .ok_or_else(|| table_miss("function", index))
}

fn var_mut(frame: &mut CallFrame, slot: u32) -> Result<&mut Value, Fault> {
    let count = frame.vars.len();
    frame
        .vars
        .get_mut(slot as usize)
        .ok_or_else(|| invariant(format!("variable slot {} of {}", slot, count)))
}

fn local_mut(frame: &mut CallFrame, local: usize) -> Result<&mut LocalSlot, Fault> {
    let count = frame.locals.len();
    frame
        .locals
        .get_mut(local)
        .ok_or_else(|| invariant(format!("frame local {} of {}", local, count)))
}

fn set_local(frame: &mut CallFrame, local: usize, slot: LocalSlot) -> Result<(), Fault> {
    *local_mut(frame, local)? = slot;
    Ok(())
}

fn literal_buffer(value: &Value) -> Result<ObjectRef, Fault> {
    match value {
        Value::Object(buffer) if buffer.borrow().as_array().is_some() => Ok(buffer.clone()),
        other => Err(invariant(format!("{} is not a literal buffer", other))),
    }
}

/// The updated value to store and the value the expression yields.
fn inc_dec(old: f64, flags: i64) -> (Value, Value) {
    let flags = flags as u8;
    let updated = if flags & INCDEC_DECREMENT != 0 {
        old - 1.0
    } else {
        old + 1.0
    };
    let result = if flags & INCDEC_POSTFIX != 0 { old } else { updated };
    (Value::Number(updated), Value::Number(result))
}

fn member_inc_dec(object: &Value, key: &str, flags: i64) -> Result<Value, NativeError> {
    let old = object.get_member(key)?.to_number();
    let (updated, result) = inc_dec(old, flags);
    object.set_member(key, updated)?;
    Ok(result)
}

fn make_closure(scope: &ObjectRef, unit: Rc<CompiledUnit>) -> Value {
    let prototype = GcPtr::new(JsObject::ordinary());
    let name = unit.name.clone();
    let mut function = JsObject::function(
        name,
        FunctionKind::Interpreted {
            unit,
            scope: scope.clone(),
        },
    );
    function.define("prototype", Value::Object(prototype.clone()));
    let function = GcPtr::new(function);
    prototype
        .borrow_mut()
        .define("constructor", Value::Object(function.clone()));
    Value::Object(function)
}

fn regexp_object(literal: &RegExpLiteral) -> Value {
    let mut object = JsObject::ordinary();
    object.define("source", Value::String(literal.source.clone()));
    object.define("flags", Value::String(literal.flags.clone()));
    object.define("global", Value::Boolean(literal.flags.contains('g')));
    object.define("ignoreCase", Value::Boolean(literal.flags.contains('i')));
    object.define("multiline", Value::Boolean(literal.flags.contains('m')));
    Value::Object(GcPtr::new(object))
}
