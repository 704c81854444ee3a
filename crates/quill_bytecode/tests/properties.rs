use proptest::collection::vec;
use proptest::prelude::*;

use quill_ast::build::*;
use quill_ast::{
    BinaryOp, Expression, ForInLeft, ForInit, LogicalOp, Statement, UnaryOp, UpdateOp,
};
use quill_bytecode::{compile, compile_function, CompiledUnit, Environment, Op};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn name() -> impl Strategy<Value = String> {
    "[a-d]"
}

fn binop() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Mod),
        Just(BinaryOp::BitAnd),
        Just(BinaryOp::UShr),
        Just(BinaryOp::Eq),
        Just(BinaryOp::StrictNe),
        Just(BinaryOp::Lt),
        Just(BinaryOp::In),
    ]
}

fn leaf() -> impl Strategy<Value = Expression> {
    prop_oneof![
        any::<f64>().prop_map(num),
        name().prop_map(|n| ident(&n)),
        "[a-z]{0,4}".prop_map(|s| string(&s)),
        any::<bool>().prop_map(boolean),
        Just(null()),
        Just(this()),
    ]
}

fn expr() -> impl Strategy<Value = Expression> {
    leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (binop(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| binary(op, l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| logical(LogicalOp::Or, l, r)),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(t, c, a)| conditional(t, c, a)),
            (inner.clone(), vec(inner.clone(), 0..3)).prop_map(|(c, args)| call(c, args)),
            (inner.clone(), vec(inner.clone(), 0..3)).prop_map(|(c, args)| new(c, args)),
            (inner.clone(), name()).prop_map(|(o, n)| member(o, &n)),
            (inner.clone(), inner.clone()).prop_map(|(o, k)| index(o, k)),
            (name(), inner.clone()).prop_map(|(n, v)| assign(ident(&n), v)),
            (inner.clone(), name(), inner.clone())
                .prop_map(|(o, n, v)| compound(quill_ast::AssignmentOp::MulAssign, member(o, &n), v)),
            vec(prop::option::of(inner.clone()), 0..4).prop_map(array),
            (name(), any::<bool>()).prop_map(|(n, p)| update(UpdateOp::Decrement, p, ident(&n))),
            (inner.clone(), any::<bool>())
                .prop_map(|(o, p)| update(UpdateOp::Increment, p, index(o, num(0.0)))),
            inner.clone().prop_map(|e| unary(UnaryOp::Typeof, e)),
            inner.clone().prop_map(|e| unary(UnaryOp::Void, e)),
            vec(inner.clone(), 1..3).prop_map(sequence),
        ]
    })
}

fn stmt() -> impl Strategy<Value = Statement> {
    let leaf = prop_oneof![
        expr().prop_map(expr_stmt),
        (name(), expr()).prop_map(|(n, e)| var(&n, Some(e))),
        Just(Statement::Empty),
    ];
    leaf.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            (expr(), inner.clone(), prop::option::of(inner.clone()))
                .prop_map(|(t, c, a)| if_else(t, c, a)),
            (expr(), vec(inner.clone(), 0..3)).prop_map(|(t, mut body)| {
                body.push(brk(None));
                while_loop(t, block(body))
            }),
            (vec(inner.clone(), 0..3), vec(inner.clone(), 0..2))
                .prop_map(|(body, handler)| try_stmt(body, Some(("e", handler)), Some(vec![]))),
            (expr(), inner.clone()).prop_map(|(d, s)| switch(
                d,
                vec![case(Some(num(1.0)), vec![s, brk(None)]), case(None, vec![])]
            )),
            vec(inner.clone(), 0..3)
                .prop_map(|b| for_in(ForInLeft::Var("k".into()), ident("o"), block(b))),
            (vec(inner.clone(), 0..3), expr()).prop_map(|(mut body, t)| {
                body.push(brk(None));
                do_while(block(body), t)
            }),
            (expr(), expr(), vec(inner.clone(), 0..2), inner.clone(), any::<bool>())
                .prop_map(|(t, exit, body, fin, leave)| labeled_loop(t, exit, body, fin, leave)),
            (expr(), vec(inner.clone(), 0..3), inner.clone()).prop_map(|(t, mut body, fin)| {
                body.push(brk(None));
                while_loop(t, try_stmt(body, None, Some(vec![fin])))
            }),
        ]
    })
}

/// `L: for (a = 0; t; a++) { body; try { if (exit) continue L | break L; }
/// finally { fin } }`
fn labeled_loop(
    test: Expression,
    exit: Expression,
    mut body: Vec<Statement>,
    fin: Statement,
    leave: bool,
) -> Statement {
    let jump = if leave { brk(Some("L")) } else { cont(Some("L")) };
    body.push(try_stmt(vec![if_else(exit, jump, None)], None, Some(vec![fin])));
    labeled(
        "L",
        for_loop(
            Some(ForInit::Expression(assign(ident("a"), num(0.0)))),
            Some(test),
            Some(update(UpdateOp::Increment, false, ident("a"))),
            block(body),
        ),
    )
}

/// A function body that returns from inside a `switch` inside a `for-in`,
/// all within `try/finally`.
fn returning_body() -> impl Strategy<Value = Vec<Statement>> {
    (expr(), stmt(), expr(), stmt()).prop_map(|(selector, before, result, fin)| {
        let cases = vec![
            case(Some(num(1.0)), vec![before, ret(Some(result))]),
            case(None, vec![brk(None)]),
        ];
        let loop_body = try_stmt(vec![switch(selector, cases)], None, Some(vec![fin.clone()]));
        vec![try_stmt(
            vec![for_in(ForInLeft::Var("k".into()), ident("o"), loop_body)],
            Some(("e", vec![ret(None)])),
            Some(vec![fin]),
        )]
    })
}

/// Every byte of every unit belongs to exactly one decodable instruction.
fn assert_fully_decodable(unit: &CompiledUnit) {
    let decoded: usize = unit.instructions().map(|i| i.op.length()).sum();
    assert_eq!(decoded, unit.code.len(), "{}", unit.disassemble());
    for nested in unit.nested.iter() {
        assert_fully_decodable(nested);
    }
}

/// Read back the value pushed by a unit compiled from `return <literal>`.
fn pushed_number(unit: &CompiledUnit) -> f64 {
    let ins: Vec<_> = unit.instructions().collect();
    match ins[0].op {
        Op::Zero if ins[1].op == Op::Neg => -0.0,
        Op::Zero => 0.0,
        Op::One => 1.0,
        Op::ShortNumber | Op::IntNumber => ins[0].operand as f64,
        Op::RegIndC0 => {
            assert_eq!(ins[1].op, Op::Number);
            unit.doubles[0]
        }
        other => panic!("unexpected literal encoding {}", other),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn scripts_compile_balanced(body in vec(stmt(), 0..6)) {
        let unit = compile(&program(body), &Environment::default());
        prop_assert!(unit.is_ok(), "{:?}", unit.err());
        assert_fully_decodable(&unit.unwrap());
    }

    #[test]
    fn functions_compile_balanced(body in vec(stmt(), 0..6), result in expr()) {
        let mut body = body;
        body.push(ret(Some(result)));
        let f = function(Some("f"), &["a", "b"], body);
        let unit = compile_function(&f, &Environment::default());
        prop_assert!(unit.is_ok(), "{:?}", unit.err());
        assert_fully_decodable(&unit.unwrap());
    }

    #[test]
    fn returns_through_finally_compile_balanced(body in returning_body()) {
        let f = function(Some("f"), &["o"], body);
        let unit = compile_function(&f, &Environment::default());
        prop_assert!(unit.is_ok(), "{:?}", unit.err());
        let unit = unit.unwrap();
        prop_assert!(unit.instructions().any(|i| i.op == Op::Gosub));
        assert_fully_decodable(&unit);
    }

    #[test]
    fn numeric_literals_round_trip(value in any::<f64>()) {
        let f = function(None, &[], vec![ret(Some(num(value)))]);
        let unit = compile_function(&f, &Environment::default()).unwrap();
        let back = pushed_number(&unit);
        if value.is_nan() {
            prop_assert!(back.is_nan());
        } else {
            prop_assert_eq!(back.to_bits(), value.to_bits());
        }
    }
}

#[test]
fn negative_zero_is_zero_then_negate() {
    let f = function(None, &[], vec![ret(Some(num(-0.0)))]);
    let unit = compile_function(&f, &Environment::default()).unwrap();
    let ops: Vec<Op> = unit.instructions().map(|i| i.op).collect();
    assert_eq!(ops, vec![Op::Zero, Op::Neg, Op::Return, Op::ReturnUndef]);
    assert!(pushed_number(&unit).is_sign_negative());
}
