//! Constructor helpers for assembling trees in code.
//!
//! Every node gets a default location; use [`at_line`] to stamp a
//! statement with the line a stack trace should report.

use quill_common::SourceLocation;

use crate::*;

fn loc() -> SourceLocation {
    SourceLocation::default()
}

pub fn program(body: Vec<Statement>) -> Program {
    Program {
        body,
        source_name: None,
        location: loc(),
    }
}

/// Set the line of a statement's location.
pub fn at_line(mut stmt: Statement, line: u32) -> Statement {
    let location = match &mut stmt {
        Statement::Expression(s) => Some(&mut s.location),
        Statement::VariableDeclaration(s) => Some(&mut s.location),
        Statement::FunctionDeclaration(s) => Some(&mut s.location),
        Statement::Return(s) => Some(&mut s.location),
        Statement::If(s) => Some(&mut s.location),
        Statement::While(s) => Some(&mut s.location),
        Statement::DoWhile(s) => Some(&mut s.location),
        Statement::For(s) => Some(&mut s.location),
        Statement::ForIn(s) => Some(&mut s.location),
        Statement::Block(s) => Some(&mut s.location),
        Statement::Break(s) => Some(&mut s.location),
        Statement::Continue(s) => Some(&mut s.location),
        Statement::Switch(s) => Some(&mut s.location),
        Statement::Throw(s) => Some(&mut s.location),
        Statement::Try(s) => Some(&mut s.location),
        Statement::Labeled(s) => Some(&mut s.location),
        Statement::Empty => None,
    };
    if let Some(location) = location {
        location.line = line;
    }
    stmt
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub fn num(value: f64) -> Expression {
    Expression::NumberLiteral(NumberLiteral {
        value,
        location: loc(),
    })
}

pub fn string(value: &str) -> Expression {
    Expression::StringLiteral(StringLiteral {
        value: value.to_string(),
        location: loc(),
    })
}

pub fn boolean(value: bool) -> Expression {
    Expression::BooleanLiteral(BooleanLiteral {
        value,
        location: loc(),
    })
}

pub fn null() -> Expression {
    Expression::NullLiteral(loc())
}

pub fn this() -> Expression {
    Expression::This(loc())
}

pub fn ident(name: &str) -> Expression {
    Expression::Identifier(IdentifierExpression {
        name: name.to_string(),
        location: loc(),
    })
}

pub fn regexp(pattern: &str, flags: &str) -> Expression {
    Expression::RegExpLiteral(RegExpLiteral {
        pattern: pattern.to_string(),
        flags: flags.to_string(),
        location: loc(),
    })
}

pub fn binary(operator: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary(BinaryExpression {
        operator,
        left: Box::new(left),
        right: Box::new(right),
        location: loc(),
    })
}

pub fn logical(operator: LogicalOp, left: Expression, right: Expression) -> Expression {
    Expression::Logical(LogicalExpression {
        operator,
        left: Box::new(left),
        right: Box::new(right),
        location: loc(),
    })
}

pub fn unary(operator: UnaryOp, argument: Expression) -> Expression {
    Expression::Unary(UnaryExpression {
        operator,
        argument: Box::new(argument),
        location: loc(),
    })
}

pub fn update(operator: UpdateOp, prefix: bool, argument: Expression) -> Expression {
    Expression::Update(UpdateExpression {
        operator,
        argument: Box::new(argument),
        prefix,
        location: loc(),
    })
}

pub fn assign(target: Expression, value: Expression) -> Expression {
    compound(AssignmentOp::Assign, target, value)
}

pub fn compound(operator: AssignmentOp, target: Expression, value: Expression) -> Expression {
    Expression::Assignment(AssignmentExpression {
        operator,
        left: Box::new(target),
        right: Box::new(value),
        location: loc(),
    })
}

pub fn conditional(test: Expression, consequent: Expression, alternate: Expression) -> Expression {
    Expression::Conditional(ConditionalExpression {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
        location: loc(),
    })
}

pub fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::Call(CallExpression {
        callee: Box::new(callee),
        arguments,
        location: loc(),
    })
}

pub fn new(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::New(NewExpression {
        callee: Box::new(callee),
        arguments,
        location: loc(),
    })
}

pub fn member(object: Expression, name: &str) -> Expression {
    Expression::Member(MemberExpression {
        object: Box::new(object),
        property: MemberProperty::Named(name.to_string()),
        location: loc(),
    })
}

pub fn index(object: Expression, key: Expression) -> Expression {
    Expression::Member(MemberExpression {
        object: Box::new(object),
        property: MemberProperty::Computed(Box::new(key)),
        location: loc(),
    })
}

pub fn array(elements: Vec<Option<Expression>>) -> Expression {
    Expression::ArrayExpression(ArrayExpression {
        elements,
        location: loc(),
    })
}

pub fn object(properties: Vec<(&str, Expression)>) -> Expression {
    Expression::ObjectExpression(ObjectExpression {
        properties: properties
            .into_iter()
            .map(|(key, value)| Property {
                key: key.to_string(),
                value,
                location: loc(),
            })
            .collect(),
        location: loc(),
    })
}

pub fn function_expr(name: Option<&str>, params: &[&str], body: Vec<Statement>) -> Expression {
    Expression::FunctionExpression(function(name, params, body))
}

pub fn sequence(expressions: Vec<Expression>) -> Expression {
    Expression::Sequence(SequenceExpression {
        expressions,
        location: loc(),
    })
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

pub fn function(name: Option<&str>, params: &[&str], body: Vec<Statement>) -> FunctionDeclaration {
    FunctionDeclaration {
        id: name.map(str::to_string),
        params: params.iter().map(|p| p.to_string()).collect(),
        body: BlockStatement {
            body,
            location: loc(),
        },
        location: loc(),
    }
}

pub fn function_decl(name: &str, params: &[&str], body: Vec<Statement>) -> Statement {
    Statement::FunctionDeclaration(function(Some(name), params, body))
}

pub fn expr_stmt(expression: Expression) -> Statement {
    Statement::Expression(ExpressionStatement {
        expression,
        location: loc(),
    })
}

pub fn var(name: &str, init: Option<Expression>) -> Statement {
    Statement::VariableDeclaration(VariableDeclaration {
        declarations: vec![VariableDeclarator {
            name: name.to_string(),
            init,
            location: loc(),
        }],
        location: loc(),
    })
}

pub fn ret(argument: Option<Expression>) -> Statement {
    Statement::Return(ReturnStatement {
        argument,
        location: loc(),
    })
}

pub fn if_else(test: Expression, consequent: Statement, alternate: Option<Statement>) -> Statement {
    Statement::If(IfStatement {
        test,
        consequent: Box::new(consequent),
        alternate: alternate.map(Box::new),
        location: loc(),
    })
}

pub fn while_loop(test: Expression, body: Statement) -> Statement {
    Statement::While(WhileStatement {
        test,
        body: Box::new(body),
        location: loc(),
    })
}

pub fn do_while(body: Statement, test: Expression) -> Statement {
    Statement::DoWhile(DoWhileStatement {
        test,
        body: Box::new(body),
        location: loc(),
    })
}

pub fn for_loop(
    init: Option<ForInit>,
    test: Option<Expression>,
    update: Option<Expression>,
    body: Statement,
) -> Statement {
    Statement::For(ForStatement {
        init,
        test,
        update,
        body: Box::new(body),
        location: loc(),
    })
}

pub fn for_in(left: ForInLeft, right: Expression, body: Statement) -> Statement {
    Statement::ForIn(ForInStatement {
        left,
        right,
        body: Box::new(body),
        location: loc(),
    })
}

pub fn block(body: Vec<Statement>) -> Statement {
    Statement::Block(BlockStatement {
        body,
        location: loc(),
    })
}

pub fn brk(label: Option<&str>) -> Statement {
    Statement::Break(BreakStatement {
        label: label.map(str::to_string),
        location: loc(),
    })
}

pub fn cont(label: Option<&str>) -> Statement {
    Statement::Continue(ContinueStatement {
        label: label.map(str::to_string),
        location: loc(),
    })
}

pub fn switch(discriminant: Expression, cases: Vec<SwitchCase>) -> Statement {
    Statement::Switch(SwitchStatement {
        discriminant,
        cases,
        location: loc(),
    })
}

pub fn case(test: Option<Expression>, consequent: Vec<Statement>) -> SwitchCase {
    SwitchCase {
        test,
        consequent,
        location: loc(),
    }
}

pub fn throw(argument: Expression) -> Statement {
    Statement::Throw(ThrowStatement {
        argument,
        location: loc(),
    })
}

pub fn try_stmt(
    block: Vec<Statement>,
    handler: Option<(&str, Vec<Statement>)>,
    finalizer: Option<Vec<Statement>>,
) -> Statement {
    Statement::Try(TryStatement {
        block: BlockStatement {
            body: block,
            location: loc(),
        },
        handler: handler.map(|(param, body)| CatchClause {
            param: param.to_string(),
            body: BlockStatement {
                body,
                location: loc(),
            },
            location: loc(),
        }),
        finalizer: finalizer.map(|body| BlockStatement {
            body,
            location: loc(),
        }),
        location: loc(),
    })
}

pub fn labeled(label: &str, body: Statement) -> Statement {
    Statement::Labeled(LabeledStatement {
        label: label.to_string(),
        body: Box::new(body),
        location: loc(),
    })
}
