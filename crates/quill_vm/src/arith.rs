//! Binary operators with a numeric fast path.
//!
//! When both operands are already numbers the interpreter works on the
//! doubles directly; anything else goes through the coercing operations of
//! [`Value`]. Both routes must agree bit for bit on numeric inputs.

use quill_bytecode::Op;
use quill_runtime::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub const ALL: [ArithOp; 5] = [
        ArithOp::Add,
        ArithOp::Sub,
        ArithOp::Mul,
        ArithOp::Div,
        ArithOp::Rem,
    ];

    pub fn from_op(op: Op) -> Option<ArithOp> {
        match op {
            Op::Add => Some(ArithOp::Add),
            Op::Sub => Some(ArithOp::Sub),
            Op::Mul => Some(ArithOp::Mul),
            Op::Div => Some(ArithOp::Div),
            Op::Mod => Some(ArithOp::Rem),
            _ => None,
        }
    }

    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        }
    }
}

/// Evaluate `op`, taking the unboxed route when both sides are numbers.
#[inline]
pub fn binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Value::Number(op.apply(*a, *b)),
        _ => generic(op, lhs, rhs),
    }
}

/// The coercing route.
pub fn generic(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        ArithOp::Add => lhs.add(rhs),
        ArithOp::Sub => lhs.sub(rhs),
        ArithOp::Mul => lhs.mul(rhs),
        ArithOp::Div => lhs.div(rhs),
        ArithOp::Rem => lhs.rem(rhs),
    }
}

/// `<`, `<=`, `>`, `>=`. Numbers compare directly; everything else goes
/// through the generic ordering, which orders two strings by code unit.
pub fn relational(op: Op, lhs: &Value, rhs: &Value) -> Option<bool> {
    if let (Value::Number(a), Value::Number(b)) = (lhs, rhs) {
        return match op {
            Op::Lt => Some(a < b),
            Op::Le => Some(a <= b),
            Op::Gt => Some(a > b),
            Op::Ge => Some(a >= b),
            _ => None,
        };
    }
    match op {
        Op::Lt => Some(lhs.lt(rhs)),
        Op::Le => Some(lhs.le(rhs)),
        Op::Gt => Some(lhs.gt(rhs)),
        Op::Ge => Some(lhs.ge(rhs)),
        _ => None,
    }
}
