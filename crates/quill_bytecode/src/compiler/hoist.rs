//! Pre-passes over a function body: var hoisting and nested-function
//! detection. Neither descends into nested function bodies.

use quill_ast::*;

/// Names declared by `var` or by function declarations anywhere in `body`,
/// in source order, possibly repeated.
pub(super) fn collect_var_names<'a>(body: &'a [Statement], out: &mut Vec<&'a str>) {
    for stmt in body {
        collect_statement(stmt, out);
    }
}

fn collect_statement<'a>(stmt: &'a Statement, out: &mut Vec<&'a str>) {
    match stmt {
        Statement::VariableDeclaration(decl) => {
            out.extend(decl.declarations.iter().map(|d| d.name.as_str()));
        }
        Statement::FunctionDeclaration(function) => {
            if let Some(id) = &function.id {
                out.push(id);
            }
        }
        Statement::If(s) => {
            collect_statement(&s.consequent, out);
            if let Some(alt) = &s.alternate {
                collect_statement(alt, out);
            }
        }
        Statement::While(s) => collect_statement(&s.body, out),
        Statement::DoWhile(s) => collect_statement(&s.body, out),
        Statement::For(s) => {
            if let Some(ForInit::VariableDeclaration(decl)) = &s.init {
                out.extend(decl.declarations.iter().map(|d| d.name.as_str()));
            }
            collect_statement(&s.body, out);
        }
        Statement::ForIn(s) => {
            if let ForInLeft::Var(name) = &s.left {
                out.push(name);
            }
            collect_statement(&s.body, out);
        }
        Statement::Block(b) => collect_var_names(&b.body, out),
        Statement::Switch(s) => {
            for case in &s.cases {
                collect_var_names(&case.consequent, out);
            }
        }
        Statement::Try(s) => {
            collect_var_names(&s.block.body, out);
            if let Some(handler) = &s.handler {
                collect_var_names(&handler.body.body, out);
            }
            if let Some(finalizer) = &s.finalizer {
                collect_var_names(&finalizer.body, out);
            }
        }
        Statement::Labeled(s) => collect_statement(&s.body, out),
        Statement::Expression(_)
        | Statement::Return(_)
        | Statement::Break(_)
        | Statement::Continue(_)
        | Statement::Throw(_)
        | Statement::Empty => {}
    }
}

/// Whether `body` defines any function, by declaration or expression.
pub(super) fn contains_functions(body: &[Statement]) -> bool {
    body.iter().any(statement_has_function)
}

fn statement_has_function(stmt: &Statement) -> bool {
    match stmt {
        Statement::FunctionDeclaration(_) => true,
        Statement::Expression(s) => expr_has_function(&s.expression),
        Statement::VariableDeclaration(decl) => decl
            .declarations
            .iter()
            .any(|d| d.init.as_ref().is_some_and(expr_has_function)),
        Statement::Return(s) => s.argument.as_ref().is_some_and(expr_has_function),
        Statement::If(s) => {
            expr_has_function(&s.test)
                || statement_has_function(&s.consequent)
                || s.alternate.as_deref().is_some_and(statement_has_function)
        }
        Statement::While(s) => expr_has_function(&s.test) || statement_has_function(&s.body),
        Statement::DoWhile(s) => expr_has_function(&s.test) || statement_has_function(&s.body),
        Statement::For(s) => {
            let init = match &s.init {
                Some(ForInit::VariableDeclaration(decl)) => decl
                    .declarations
                    .iter()
                    .any(|d| d.init.as_ref().is_some_and(expr_has_function)),
                Some(ForInit::Expression(e)) => expr_has_function(e),
                None => false,
            };
            init || s.test.as_ref().is_some_and(expr_has_function)
                || s.update.as_ref().is_some_and(expr_has_function)
                || statement_has_function(&s.body)
        }
        Statement::ForIn(s) => {
            let left = match &s.left {
                ForInLeft::Target(e) => expr_has_function(e),
                ForInLeft::Var(_) => false,
            };
            left || expr_has_function(&s.right) || statement_has_function(&s.body)
        }
        Statement::Block(b) => contains_functions(&b.body),
        Statement::Switch(s) => {
            expr_has_function(&s.discriminant)
                || s.cases.iter().any(|c| {
                    c.test.as_ref().is_some_and(expr_has_function) || contains_functions(&c.consequent)
                })
        }
        Statement::Throw(s) => expr_has_function(&s.argument),
        Statement::Try(s) => {
            contains_functions(&s.block.body)
                || s.handler.as_ref().is_some_and(|h| contains_functions(&h.body.body))
                || s.finalizer.as_ref().is_some_and(|f| contains_functions(&f.body))
        }
        Statement::Labeled(s) => statement_has_function(&s.body),
        Statement::Break(_) | Statement::Continue(_) | Statement::Empty => false,
    }
}

fn expr_has_function(expr: &Expression) -> bool {
    match expr {
        Expression::FunctionExpression(_) => true,
        Expression::Identifier(_)
        | Expression::NumberLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::BooleanLiteral(_)
        | Expression::NullLiteral(_)
        | Expression::RegExpLiteral(_)
        | Expression::This(_) => false,
        Expression::ArrayExpression(a) => a.elements.iter().flatten().any(expr_has_function),
        Expression::ObjectExpression(o) => o.properties.iter().any(|p| expr_has_function(&p.value)),
        Expression::Unary(e) => expr_has_function(&e.argument),
        Expression::Update(e) => expr_has_function(&e.argument),
        Expression::Binary(e) => expr_has_function(&e.left) || expr_has_function(&e.right),
        Expression::Logical(e) => expr_has_function(&e.left) || expr_has_function(&e.right),
        Expression::Assignment(e) => expr_has_function(&e.left) || expr_has_function(&e.right),
        Expression::Conditional(e) => {
            expr_has_function(&e.test)
                || expr_has_function(&e.consequent)
                || expr_has_function(&e.alternate)
        }
        Expression::Call(e) => {
            expr_has_function(&e.callee) || e.arguments.iter().any(expr_has_function)
        }
        Expression::New(e) => expr_has_function(&e.callee) || e.arguments.iter().any(expr_has_function),
        Expression::Member(e) => {
            expr_has_function(&e.object)
                || matches!(&e.property, MemberProperty::Computed(key) if expr_has_function(key))
        }
        Expression::Sequence(e) => e.expressions.iter().any(expr_has_function),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::build::*;

    #[test]
    fn vars_are_collected_through_nested_statements() {
        let body = vec![
            var("a", None),
            if_else(boolean(true), block(vec![var("b", Some(num(1.0)))]), None),
            for_in(ForInLeft::Var("k".into()), ident("o"), Statement::Empty),
            function_decl("f", &[], vec![var("inner", None)]),
            try_stmt(vec![var("c", None)], Some(("e", vec![var("d", None)])), None),
        ];
        let mut names = Vec::new();
        collect_var_names(&body, &mut names);
        assert_eq!(names, vec!["a", "b", "k", "f", "c", "d"]);
    }

    #[test]
    fn function_expressions_are_detected_anywhere() {
        let plain = vec![expr_stmt(call(ident("f"), vec![num(1.0)]))];
        assert!(!contains_functions(&plain));

        let nested = vec![while_loop(
            boolean(true),
            expr_stmt(call(ident("g"), vec![function_expr(None, &[], vec![])])),
        )];
        assert!(contains_functions(&nested));
    }
}
