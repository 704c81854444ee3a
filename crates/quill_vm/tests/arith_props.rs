use std::rc::Rc;

use proptest::prelude::*;

use quill_ast::build::*;
use quill_ast::BinaryOp;
use quill_bytecode::compile;
use quill_runtime::Value;
use quill_vm::arith::{self, ArithOp};
use quill_vm::{EngineConfig, Vm};

fn arith_op() -> impl Strategy<Value = ArithOp> {
    prop::sample::select(ArithOp::ALL.to_vec())
}

fn number() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => any::<f64>(),
        1 => Just(0.0),
        1 => Just(-0.0),
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        2 => (-1000i32..1000).prop_map(f64::from),
    ]
}

fn operand() -> impl Strategy<Value = Value> {
    prop_oneof![
        number().prop_map(Value::Number),
        "[0-9]{0,3}".prop_map(|s| Value::string(s.as_str())),
        "[a-c]{1,2}".prop_map(|s| Value::string(s.as_str())),
        any::<bool>().prop_map(Value::Boolean),
        Just(Value::Null),
        Just(Value::Undefined),
    ]
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
        _ => a.strict_eq(b),
    }
}

fn binary_op(op: ArithOp) -> BinaryOp {
    match op {
        ArithOp::Add => BinaryOp::Add,
        ArithOp::Sub => BinaryOp::Sub,
        ArithOp::Mul => BinaryOp::Mul,
        ArithOp::Div => BinaryOp::Div,
        ArithOp::Rem => BinaryOp::Mod,
    }
}

proptest! {
    #[test]
    fn fast_path_is_bit_identical(op in arith_op(), a in number(), b in number()) {
        let (x, y) = (Value::Number(a), Value::Number(b));
        let fast = arith::binary(op, &x, &y);
        let slow = arith::generic(op, &x, &y);
        prop_assert!(same(&fast, &slow), "{:?} {} {} gave {:?} and {:?}", op, a, b, fast, slow);
    }

    #[test]
    fn mixed_operands_match_the_coercing_route(op in arith_op(), a in operand(), b in operand()) {
        let result = arith::binary(op, &a, &b);
        prop_assert!(same(&result, &arith::generic(op, &a, &b)));
    }

    #[test]
    fn interpreter_agrees_with_the_operator(op in arith_op(), a in number(), b in number()) {
        let body = vec![expr_stmt(binary(binary_op(op), num(a), num(b)))];
        let config = EngineConfig::default();
        let unit = compile(&program(body), &config.environment("prop.js")).unwrap();
        let result = Vm::with_config(config).execute(Rc::new(unit)).unwrap();
        let expected = Value::Number(op.apply(a, b));
        prop_assert!(same(&result, &expected), "{:?} {} {} gave {:?}", op, a, b, result);
    }
}
