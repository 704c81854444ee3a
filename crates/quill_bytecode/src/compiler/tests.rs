use super::*;
use crate::unit::{HandlerKind, LiteralId, STRICT_EQUALITY_VERSION};
use crate::{compile, compile_function, Environment};
use quill_ast::build::*;

fn compile_script(body: Vec<Statement>) -> CompiledUnit {
    compile(&program(body), &Environment::default()).unwrap()
}

fn compile_err(body: Vec<Statement>) -> CompileError {
    compile(&program(body), &Environment::default()).unwrap_err()
}

fn compile_fn(params: &[&str], body: Vec<Statement>) -> CompiledUnit {
    compile_function(&function(Some("f"), params, body), &Environment::default()).unwrap()
}

fn ops(unit: &CompiledUnit) -> Vec<Op> {
    unit.instructions().map(|i| i.op).collect()
}

fn contains_seq(haystack: &[Op], needle: &[Op]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ---- Literals -------------------------------------------------------

#[test]
fn compile_empty_program() {
    let unit = compile_script(vec![]);
    assert_eq!(ops(&unit), vec![Op::ReturnResult]);
    assert!(unit.flags.top_level);
}

#[test]
fn script_expression_stores_result() {
    let unit = compile_script(vec![expr_stmt(num(42.0))]);
    assert_eq!(
        ops(&unit),
        vec![Op::ShortNumber, Op::PopResult, Op::ReturnResult]
    );
    assert_eq!(unit.decode(0).unwrap().operand, 42);
}

#[test]
fn numbers_use_compact_forms() {
    let cases: Vec<(f64, Vec<Op>)> = vec![
        (0.0, vec![Op::Zero]),
        (-0.0, vec![Op::Zero, Op::Neg]),
        (1.0, vec![Op::One]),
        (-7.0, vec![Op::ShortNumber]),
        (32767.0, vec![Op::ShortNumber]),
        (32768.0, vec![Op::IntNumber]),
        (-2147483648.0, vec![Op::IntNumber]),
        (2147483648.0, vec![Op::RegIndC0, Op::Number]),
        (1.5, vec![Op::RegIndC0, Op::Number]),
        (f64::NAN, vec![Op::RegIndC0, Op::Number]),
        (f64::INFINITY, vec![Op::RegIndC0, Op::Number]),
    ];
    for (value, expected) in cases {
        let unit = compile_fn(&[], vec![expr_stmt(num(value))]);
        let mut got = ops(&unit);
        got.truncate(got.len() - 2); // POP, RETUNDEF
        assert_eq!(got, expected, "literal {}", value);
    }
}

#[test]
fn non_integral_literal_goes_to_double_table() {
    let unit = compile_fn(&[], vec![expr_stmt(num(2.25))]);
    assert_eq!(&*unit.doubles, &[2.25]);
}

#[test]
fn string_literal_is_interned() {
    let unit = compile_fn(&[], vec![expr_stmt(string("hi")), expr_stmt(string("hi"))]);
    assert_eq!(unit.strings.len(), 1);
    assert_eq!(&*unit.strings[0], "hi");
    assert_eq!(ops(&unit)[..2], [Op::RegStrC0, Op::String]);
}

#[test]
fn sparse_array_records_holes() {
    let unit = compile_fn(&[], vec![expr_stmt(array(vec![Some(num(1.0)), None, Some(num(3.0))]))]);
    assert!(ops(&unit).contains(&Op::SparseArrayLit));
    assert_eq!(
        unit.literal_ids[0],
        LiteralId::SkipIndices {
            holes: vec![1].into(),
            length: 3
        }
    );
}

#[test]
fn dense_array_and_object_literals() {
    let unit = compile_fn(
        &[],
        vec![
            expr_stmt(array(vec![Some(num(1.0)), Some(num(2.0))])),
            expr_stmt(object(vec![("a", num(1.0)), ("b", string("x"))])),
        ],
    );
    let got = ops(&unit);
    assert!(contains_seq(&got, &[Op::RegIndC2, Op::LiteralNew, Op::One, Op::LiteralSet]));
    assert!(got.contains(&Op::ArrayLit));
    assert!(got.contains(&Op::ObjectLit));
    match &unit.literal_ids[0] {
        LiteralId::PropertyNames(names) => {
            let names: Vec<&str> = names.iter().map(|n| &**n).collect();
            assert_eq!(names, vec!["a", "b"]);
        }
        other => panic!("unexpected literal id {:?}", other),
    }
}

// ---- Variables ------------------------------------------------------

#[test]
fn function_vars_live_in_slots() {
    let unit = compile_fn(
        &["a"],
        vec![var("b", Some(ident("a"))), ret(Some(ident("b")))],
    );
    assert_eq!(unit.param_count, 1);
    assert!(!unit.flags.needs_activation);
    assert_eq!(
        ops(&unit),
        vec![
            Op::GetVar1,
            Op::SetVar1,
            Op::Pop,
            Op::GetVar1,
            Op::Return,
            Op::ReturnUndef
        ]
    );
    let names: Vec<&str> = unit.var_names.iter().map(|n| &**n).collect();
    assert_eq!(names, vec!["a", "b", "f"]);
    assert_eq!(unit.self_var, Some(2));
}

#[test]
fn script_vars_are_names() {
    let unit = compile_script(vec![var("x", Some(num(1.0)))]);
    assert_eq!(
        ops(&unit),
        vec![Op::One, Op::RegStrC0, Op::SetName, Op::Pop, Op::ReturnResult]
    );
    assert_eq!(&*unit.var_names[0], "x");
}

#[test]
fn nested_function_forces_activation() {
    let unit = compile_fn(
        &[],
        vec![
            var("x", Some(num(1.0))),
            ret(Some(function_expr(None, &[], vec![ret(Some(ident("x")))]))),
        ],
    );
    assert!(unit.flags.needs_activation);
    assert!(ops(&unit).contains(&Op::SetName));
    assert!(ops(&unit).contains(&Op::ClosureExpr));

    let inner = &unit.nested[0];
    assert!(!inner.flags.needs_activation);
    assert!(ops(inner).contains(&Op::Name));
}

#[test]
fn function_declarations_are_hoisted() {
    let unit = compile_script(vec![
        expr_stmt(call(ident("g"), vec![])),
        function_decl("g", &[], vec![]),
    ]);
    let got = ops(&unit);
    assert_eq!(got[..2], [Op::RegIndC0, Op::ClosureStmt]);
    assert_eq!(unit.nested.len(), 1);
    assert_eq!(&*unit.nested[0].name, "g");
    assert_eq!(unit.nested[0].kind, FunctionKind::Declaration);
}

#[test]
fn named_function_expression_binds_itself() {
    let unit = compile_script(vec![var(
        "g",
        Some(function_expr(Some("fact"), &["n"], vec![ret(Some(ident("n")))])),
    )]);
    let inner = &unit.nested[0];
    assert_eq!(inner.self_var, Some(1));
    assert_eq!(&*inner.var_names[1], "fact");
}

#[test]
fn activation_required_by_environment() {
    let env = Environment {
        require_activation: true,
        ..Environment::default()
    };
    let unit = compile_function(&function(Some("f"), &["a"], vec![ret(Some(ident("a")))]), &env).unwrap();
    assert!(unit.flags.needs_activation);
    assert_eq!(ops(&unit)[..2], [Op::RegStrC0, Op::Name]);
}

// ---- Operators ------------------------------------------------------

#[test]
fn logical_and_short_circuits() {
    let unit = compile_fn(
        &["a", "b"],
        vec![expr_stmt(logical(LogicalOp::And, ident("a"), ident("b")))],
    );
    assert_eq!(
        ops(&unit)[..5],
        [Op::GetVar1, Op::Dup, Op::IfEq, Op::Pop, Op::GetVar1]
    );
}

#[test]
fn conditional_balances_stack() {
    let unit = compile_fn(
        &["c"],
        vec![ret(Some(conditional(ident("c"), num(1.0), num(2.0))))],
    );
    assert_eq!(unit.max_stack, 1);
}

#[test]
fn equality_under_version_120_is_strict() {
    let env = Environment {
        language_version: STRICT_EQUALITY_VERSION,
        ..Environment::default()
    };
    let f = function(Some("f"), &["a"], vec![ret(Some(binary(BinaryOp::Eq, ident("a"), num(2.0))))]);
    let unit = compile_function(&f, &env).unwrap();
    assert!(ops(&unit).contains(&Op::ShEq));

    let unit = compile_function(&f, &Environment::default()).unwrap();
    assert!(ops(&unit).contains(&Op::Eq));
}

#[test]
fn compound_member_assignment() {
    let unit = compile_fn(
        &["o"],
        vec![expr_stmt(compound(
            AssignmentOp::AddAssign,
            member(ident("o"), "n"),
            num(2.0),
        ))],
    );
    assert_eq!(
        ops(&unit)[..7],
        [
            Op::GetVar1,
            Op::Dup,
            Op::RegStrC0,
            Op::GetProp,
            Op::ShortNumber,
            Op::Add,
            Op::RegStrC0
        ]
    );
    assert!(ops(&unit).contains(&Op::SetProp));
}

#[test]
fn update_flags_encode_shape() {
    let unit = compile_fn(
        &["i"],
        vec![
            expr_stmt(update(UpdateOp::Increment, false, ident("i"))),
            expr_stmt(update(UpdateOp::Decrement, true, ident("g"))),
        ],
    );
    let incdec: Vec<_> = unit
        .instructions()
        .filter(|i| matches!(i.op, Op::VarIncDec | Op::NameIncDec))
        .map(|i| (i.op, i.operand as u8))
        .collect();
    assert_eq!(
        incdec,
        vec![
            (Op::VarIncDec, crate::opcode::INCDEC_POSTFIX),
            (Op::NameIncDec, crate::opcode::INCDEC_DECREMENT)
        ]
    );
}

#[test]
fn invalid_assignment_target_is_rejected() {
    let err = compile_err(vec![expr_stmt(assign(num(1.0), num(2.0)))]);
    assert!(matches!(err, CompileError::MalformedNode { .. }));
}

#[test]
fn typeof_undeclared_name_does_not_throw() {
    let unit = compile_fn(&[], vec![expr_stmt(unary(UnaryOp::Typeof, ident("nope")))]);
    assert!(ops(&unit).contains(&Op::TypeOfName));
}

// ---- Calls ----------------------------------------------------------

#[test]
fn call_shapes_resolve_this() {
    let unit = compile_fn(
        &["local"],
        vec![
            expr_stmt(call(ident("free"), vec![])),
            expr_stmt(call(ident("local"), vec![])),
            expr_stmt(call(member(ident("local"), "m"), vec![num(1.0)])),
            expr_stmt(call(index(ident("local"), string("k")), vec![])),
            expr_stmt(call(call(ident("free"), vec![]), vec![])),
        ],
    );
    let got = ops(&unit);
    assert!(contains_seq(&got, &[Op::RegStrC0, Op::NameAndThis, Op::Call]));
    assert!(contains_seq(&got, &[Op::GetVar1, Op::ValueAndThis, Op::Call]));
    assert!(contains_seq(&got, &[Op::PropAndThis, Op::One, Op::Call]));
    assert!(got.contains(&Op::ElemAndThis));
    assert!(contains_seq(&got, &[Op::Call, Op::ValueAndThis, Op::Call]));
}

#[test]
fn return_call_is_a_tail_call() {
    let unit = compile_fn(&[], vec![ret(Some(call(ident("g"), vec![num(1.0)])))]);
    assert!(contains_seq(&ops(&unit), &[Op::TailCall, Op::Return]));
}

#[test]
fn return_call_inside_try_is_not_a_tail_call() {
    let unit = compile_fn(
        &[],
        vec![try_stmt(
            vec![ret(Some(call(ident("g"), vec![])))],
            None,
            Some(vec![]),
        )],
    );
    let got = ops(&unit);
    assert!(!got.contains(&Op::TailCall));
    assert!(contains_seq(&got, &[Op::Call, Op::PopResult]));
    assert!(got.contains(&Op::ReturnResult));
}

#[test]
fn return_at_top_level_is_rejected() {
    let err = compile_err(vec![ret(None)]);
    assert!(matches!(err, CompileError::MalformedNode { .. }));
}

// ---- Control flow ---------------------------------------------------

#[test]
fn while_loop_tests_at_bottom() {
    let unit = compile_fn(
        &["n"],
        vec![while_loop(
            ident("n"),
            expr_stmt(update(UpdateOp::Decrement, true, ident("n"))),
        )],
    );
    let first = unit.decode(0).unwrap();
    assert_eq!(first.op, Op::Goto);
    let cond = first.operand as usize;
    assert_eq!(unit.decode(cond).unwrap().op, Op::GetVar1);
    let back = unit
        .instructions()
        .find(|i| i.op == Op::IfNe)
        .unwrap();
    assert_eq!(back.operand, 3);
}

#[test]
fn switch_dispatches_with_strict_equality() {
    let unit = compile_fn(
        &["x"],
        vec![switch(
            ident("x"),
            vec![
                case(Some(num(1.0)), vec![brk(None)]),
                case(None, vec![expr_stmt(num(2.0))]),
            ],
        )],
    );
    assert!(contains_seq(
        &ops(&unit),
        &[Op::GetVar1, Op::Dup, Op::One, Op::ShEq, Op::IfEqPop, Op::Pop, Op::Goto]
    ));
}

#[test]
fn stray_break_is_rejected() {
    let err = compile_err(vec![brk(None)]);
    assert!(matches!(err, CompileError::StrayJump { keyword: "break", .. }));
}

#[test]
fn undefined_label_is_rejected() {
    let err = compile_err(vec![while_loop(boolean(true), brk(Some("nowhere")))]);
    assert!(matches!(err, CompileError::UndefinedLabel { ref label, .. } if label == "nowhere"));
}

#[test]
fn continue_to_non_loop_label_is_rejected() {
    let err = compile_err(vec![labeled(
        "blk",
        block(vec![while_loop(boolean(true), cont(Some("blk")))]),
    )]);
    assert!(matches!(err, CompileError::StrayJump { keyword: "continue", .. }));
}

#[test]
fn labeled_continue_targets_outer_loop() {
    let unit = compile_script(vec![labeled(
        "outer",
        while_loop(
            boolean(true),
            while_loop(boolean(true), cont(Some("outer"))),
        ),
    )]);
    assert!(ops(&unit).contains(&Op::Goto));
}

#[test]
fn labeled_block_break() {
    let unit = compile_script(vec![labeled(
        "blk",
        block(vec![brk(Some("blk")), expr_stmt(num(1.0))]),
    )]);
    let first = unit.decode(0).unwrap();
    assert_eq!(first.op, Op::Goto);
    assert_eq!(unit.decode(first.operand as usize).unwrap().op, Op::ReturnResult);
}

#[test]
fn for_in_uses_enumerator_local() {
    let unit = compile_fn(
        &["o"],
        vec![for_in(ForInLeft::Var("k".into()), ident("o"), Statement::Empty)],
    );
    let got = ops(&unit);
    assert!(contains_seq(&got, &[Op::GetVar1, Op::EnumInit, Op::Goto]));
    assert!(contains_seq(&got, &[Op::EnumId, Op::SetVar1, Op::Pop]));
    assert!(contains_seq(&got, &[Op::EnumNext, Op::IfNe, Op::LocalClear]));
    assert_eq!(unit.max_locals, 1);
}

// ---- Exceptions -----------------------------------------------------

#[test]
fn try_catch_finally_table() {
    let unit = compile_script(vec![try_stmt(
        vec![expr_stmt(call(ident("x"), vec![]))],
        Some(("e", vec![expr_stmt(call(ident("y"), vec![]))])),
        Some(vec![expr_stmt(call(ident("z"), vec![]))]),
    )]);
    assert_eq!(unit.handlers.len(), 2);
    let catch = unit.handlers[0];
    let finally = unit.handlers[1];
    assert_eq!(catch.kind, HandlerKind::Catch);
    assert_eq!(finally.kind, HandlerKind::Finally);
    assert_eq!(catch.start, finally.start);
    assert!(catch.end < finally.end);
    assert_eq!(catch.scope_local, finally.scope_local);
    assert_eq!(unit.max_locals, 3);

    let in_try = catch.start as usize;
    assert_eq!(unit.find_handler(in_try, false), Some(&catch));
    assert_eq!(unit.find_handler(in_try, true), Some(&finally));
    assert_eq!(unit.find_handler(catch.handler as usize, false), Some(&finally));

    assert_eq!(unit.decode(catch.handler as usize).unwrap().op, Op::LocalLoad);
    assert_eq!(unit.decode(0).unwrap().op, Op::ScopeSave);
    assert!(unit
        .instructions()
        .any(|i| i.op == Op::RetSub && i.operand == finally.exception_local as i64));
}

#[test]
fn try_finally_without_catch_uses_two_locals() {
    let unit = compile_script(vec![try_stmt(
        vec![expr_stmt(call(ident("x"), vec![]))],
        None,
        Some(vec![expr_stmt(call(ident("z"), vec![]))]),
    )]);
    assert_eq!(unit.handlers.len(), 1);
    let finally = unit.handlers[0];
    assert_eq!(finally.kind, HandlerKind::Finally);
    assert_eq!(finally.scope_local, 0);
    assert_eq!(finally.exception_local, 1);
    assert_eq!(unit.max_locals, 2);
}

#[test]
fn catch_param_resolves_by_name() {
    let unit = compile_fn(
        &["e"],
        vec![try_stmt(
            vec![],
            Some(("e", vec![ret(Some(ident("e")))])),
            None,
        )],
    );
    let got = ops(&unit);
    assert!(contains_seq(&got, &[Op::LocalLoad, Op::RegStrC0, Op::CatchScope]));
    assert!(contains_seq(&got, &[Op::RegStrC0, Op::Name, Op::Return]));
}

#[test]
fn break_through_finally_runs_subroutine() {
    let unit = compile_script(vec![labeled(
        "outer",
        while_loop(
            boolean(true),
            try_stmt(
                vec![brk(Some("outer"))],
                None,
                Some(vec![expr_stmt(call(ident("f"), vec![]))]),
            ),
        ),
    )]);
    let gosubs = unit.instructions().filter(|i| i.op == Op::Gosub).count();
    assert_eq!(gosubs, 2);
}

#[test]
fn break_out_of_catch_restores_scope() {
    let unit = compile_script(vec![while_loop(
        boolean(true),
        try_stmt(vec![], Some(("e", vec![brk(None)])), None),
    )]);
    assert!(contains_seq(&ops(&unit), &[Op::CatchScope, Op::ScopeLoad, Op::Goto]));
}

// ---- Encoding -------------------------------------------------------

#[test]
fn line_table_follows_statements() {
    let unit = compile_script(vec![
        at_line(expr_stmt(num(1.0)), 3),
        at_line(expr_stmt(num(2.0)), 3),
        at_line(expr_stmt(num(3.0)), 5),
    ]);
    assert_eq!(unit.lines.len(), 2);
    assert_eq!(unit.lines[0], (0, 3));
    let (pc, line) = unit.lines[1];
    assert_eq!(line, 5);
    assert_eq!(unit.line_at(pc as usize - 1), 3);
    assert_eq!(unit.line_at(pc as usize), 5);
}

#[test]
fn jumps_round_trip_beyond_16_bits() {
    let body: Vec<Statement> = (0..10_000)
        .map(|_| expr_stmt(assign(ident("x"), num(1.0))))
        .collect();
    let unit = compile_fn(
        &["x"],
        vec![while_loop(ident("x"), block(body))],
    );
    assert!(unit.code.len() > 40_000);
    assert_eq!(unit.long_jumps.len(), 2);

    let goto = unit.decode(0).unwrap();
    assert_eq!(goto.op, Op::Goto);
    assert_eq!(unit.read_i16(1), Some(0));
    let cond = goto.operand as usize;
    assert_eq!(unit.decode(cond).unwrap().op, Op::GetVar1);

    let back = unit.decode(cond + 2).unwrap();
    assert_eq!(back.op, Op::IfNe);
    assert_eq!(back.operand, 3);
}

#[test]
fn jumps_round_trip_within_16_bits() {
    let body: Vec<Statement> = (0..100)
        .map(|_| expr_stmt(assign(ident("x"), num(1.0))))
        .collect();
    let unit = compile_fn(&["x"], vec![while_loop(ident("x"), block(body))]);
    assert!(unit.long_jumps.is_empty());
    let goto = unit.decode(0).unwrap();
    assert_eq!(goto.operand as usize, 3 + 100 * 4);
}

#[test]
fn disassembly_includes_nested_units() {
    let unit = compile_script(vec![function_decl("inner", &["a"], vec![ret(Some(ident("a")))])]);
    let text = unit.disassemble();
    assert!(text.contains("<script>"));
    assert!(text.contains("=== inner"));
    assert!(text.contains("CLOSURE_STMT"));
}
