use std::rc::Rc;

use quill_ast::*;
use quill_common::{CompileError, Result};

use crate::opcode::{Op, INCDEC_DECREMENT, INCDEC_POSTFIX};
use crate::unit::{FunctionKind, LiteralId, STRICT_EQUALITY_VERSION};

use super::{Binding, Compiler};

impl Compiler<'_> {
    // ------------------------------------------------------------------
    //  Expressions
    // ------------------------------------------------------------------

    /// Lower one expression. Every expression leaves exactly one value.
    pub(crate) fn compile_expression(&mut self, expr: &Expression) -> Result<()> {
        let depth = self.buf.stack_depth();
        self.compile_expression_inner(expr)?;
        self.expect_depth(depth + 1)
    }

    fn compile_expression_inner(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Identifier(id) => self.emit_load_name(&id.name),
            Expression::NumberLiteral(n) => self.emit_number(n.value),
            Expression::StringLiteral(s) => self.buf.emit_with_string(Op::String, &s.value),
            Expression::BooleanLiteral(b) => {
                self.buf.emit(if b.value { Op::True } else { Op::False })
            }
            Expression::NullLiteral(_) => self.buf.emit(Op::Null),
            Expression::This(_) => self.buf.emit(Op::This),
            Expression::RegExpLiteral(re) => {
                let literal = self
                    .env
                    .regexp_compiler
                    .compile(&re.pattern, &re.flags)
                    .map_err(|message| CompileError::malformed(message, re.location))?;
                let index = self.buf.add_regexp(literal);
                self.buf.emit_with_index(Op::RegExp, index);
            }
            Expression::ArrayExpression(array) => self.compile_array_literal(array)?,
            Expression::ObjectExpression(object) => self.compile_object_literal(object)?,
            Expression::FunctionExpression(function) => {
                let index = self.compile_nested(function, FunctionKind::Expression)?;
                self.buf.emit_with_index(Op::ClosureExpr, index);
            }
            Expression::Unary(unary) => self.compile_unary(unary)?,
            Expression::Update(update) => self.compile_update(update)?,
            Expression::Binary(binary) => {
                self.compile_expression(&binary.left)?;
                self.compile_expression(&binary.right)?;
                let op = self.binary_opcode(binary.operator);
                self.buf.emit(op);
            }
            Expression::Logical(logical) => {
                self.compile_expression(&logical.left)?;
                let end = self.buf.new_label();
                self.buf.emit(Op::Dup);
                let skip = match logical.operator {
                    LogicalOp::And => Op::IfEq,
                    LogicalOp::Or => Op::IfNe,
                };
                self.buf.emit_jump(skip, end);
                self.buf.emit(Op::Pop);
                self.compile_expression(&logical.right)?;
                self.buf.mark_label(end)?;
            }
            Expression::Assignment(assignment) => self.compile_assignment(assignment)?,
            Expression::Conditional(cond) => {
                self.compile_expression(&cond.test)?;
                let else_label = self.buf.new_label();
                let end = self.buf.new_label();
                self.buf.emit_jump(Op::IfEq, else_label);
                self.compile_expression(&cond.consequent)?;
                self.buf.emit_jump(Op::Goto, end);
                // Only one arm's value reaches the join point.
                self.buf.adjust_stack(-1);
                self.buf.mark_label(else_label)?;
                self.compile_expression(&cond.alternate)?;
                self.buf.mark_label(end)?;
            }
            Expression::Call(call) => self.compile_call(call, false)?,
            Expression::New(new) => {
                self.compile_expression(&new.callee)?;
                for arg in &new.arguments {
                    self.compile_expression(arg)?;
                }
                self.buf.emit_call(Op::New, new.arguments.len())?;
            }
            Expression::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Named(name) => self.buf.emit_with_string(Op::GetProp, name),
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key)?;
                        self.buf.emit(Op::GetElem);
                    }
                }
            }
            Expression::Sequence(seq) => {
                let Some((last, init)) = seq.expressions.split_last() else {
                    return Err(CompileError::malformed("empty sequence", seq.location));
                };
                for e in init {
                    self.compile_expression(e)?;
                    self.buf.emit(Op::Pop);
                }
                self.compile_expression(last)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Literals
    // ------------------------------------------------------------------

    /// Push a number using the most compact encoding that round-trips.
    pub(crate) fn emit_number(&mut self, value: f64) {
        if value == 0.0 {
            self.buf.emit(Op::Zero);
            if value.is_sign_negative() {
                self.buf.emit(Op::Neg);
            }
        } else if value == 1.0 {
            self.buf.emit(Op::One);
        } else if value.fract() == 0.0 && (i16::MIN as f64..=i16::MAX as f64).contains(&value) {
            self.buf.emit_u16(Op::ShortNumber, value as i16 as u16);
        } else if value.fract() == 0.0 && (i32::MIN as f64..=i32::MAX as f64).contains(&value) {
            self.buf.emit_u32(Op::IntNumber, value as i32 as u32);
        } else {
            let index = self.buf.add_double(value);
            self.buf.emit_with_index(Op::Number, index);
        }
    }

    fn compile_array_literal(&mut self, array: &ArrayExpression) -> Result<()> {
        let holes: Vec<u32> = array
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i as u32)
            .collect();
        let count = array.elements.len() - holes.len();
        self.buf.emit_with_index(Op::LiteralNew, count as u32);
        for element in array.elements.iter().flatten() {
            self.compile_expression(element)?;
            self.buf.emit(Op::LiteralSet);
        }

        if holes.is_empty() {
            self.buf.emit(Op::ArrayLit);
        } else {
            let id = self.buf.add_literal_id(LiteralId::SkipIndices {
                holes: holes.into(),
                length: array.elements.len() as u32,
            });
            self.buf.emit_with_index(Op::SparseArrayLit, id);
        }
        Ok(())
    }

    fn compile_object_literal(&mut self, object: &ObjectExpression) -> Result<()> {
        self.buf
            .emit_with_index(Op::LiteralNew, object.properties.len() as u32);
        for property in &object.properties {
            self.compile_expression(&property.value)?;
            self.buf.emit(Op::LiteralSet);
        }
        let names: Box<[Rc<str>]> = object
            .properties
            .iter()
            .map(|p| Rc::from(p.key.as_str()))
            .collect();
        let id = self.buf.add_literal_id(LiteralId::PropertyNames(names));
        self.buf.emit_with_index(Op::ObjectLit, id);
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Operators
    // ------------------------------------------------------------------

    fn binary_opcode(&self, op: BinaryOp) -> Op {
        let strict_equality = self.env.language_version == STRICT_EQUALITY_VERSION;
        match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Sub => Op::Sub,
            BinaryOp::Mul => Op::Mul,
            BinaryOp::Div => Op::Div,
            BinaryOp::Mod => Op::Mod,
            BinaryOp::BitAnd => Op::BitAnd,
            BinaryOp::BitOr => Op::BitOr,
            BinaryOp::BitXor => Op::BitXor,
            BinaryOp::Shl => Op::Lsh,
            BinaryOp::Shr => Op::Rsh,
            BinaryOp::UShr => Op::Ursh,
            BinaryOp::Eq if strict_equality => Op::ShEq,
            BinaryOp::Ne if strict_equality => Op::ShNe,
            BinaryOp::Eq => Op::Eq,
            BinaryOp::Ne => Op::Ne,
            BinaryOp::StrictEq => Op::ShEq,
            BinaryOp::StrictNe => Op::ShNe,
            BinaryOp::Lt => Op::Lt,
            BinaryOp::Le => Op::Le,
            BinaryOp::Gt => Op::Gt,
            BinaryOp::Ge => Op::Ge,
            BinaryOp::In => Op::In,
            BinaryOp::Instanceof => Op::InstanceOf,
        }
    }

    fn compile_unary(&mut self, unary: &UnaryExpression) -> Result<()> {
        match unary.operator {
            UnaryOp::Typeof => match &*unary.argument {
                Expression::Identifier(id) if self.resolve(&id.name) == Binding::Name => {
                    self.buf.emit_with_string(Op::TypeOfName, &id.name);
                }
                argument => {
                    self.compile_expression(argument)?;
                    self.buf.emit(Op::TypeOf);
                }
            },
            UnaryOp::Delete => match &*unary.argument {
                Expression::Member(member) => {
                    self.compile_expression(&member.object)?;
                    match &member.property {
                        MemberProperty::Named(name) => {
                            self.buf.emit_with_string(Op::String, name)
                        }
                        MemberProperty::Computed(key) => self.compile_expression(key)?,
                    }
                    self.buf.emit(Op::DelProp);
                }
                // Declared bindings are not deletable.
                Expression::Identifier(_) => self.buf.emit(Op::False),
                argument => {
                    self.compile_expression(argument)?;
                    self.buf.emit(Op::Pop);
                    self.buf.emit(Op::True);
                }
            },
            UnaryOp::Void => {
                self.compile_expression(&unary.argument)?;
                self.buf.emit(Op::Pop);
                self.buf.emit(Op::Undef);
            }
            UnaryOp::Minus => {
                self.compile_expression(&unary.argument)?;
                self.buf.emit(Op::Neg);
            }
            UnaryOp::Plus => {
                self.compile_expression(&unary.argument)?;
                self.buf.emit(Op::Pos);
            }
            UnaryOp::Not => {
                self.compile_expression(&unary.argument)?;
                self.buf.emit(Op::Not);
            }
            UnaryOp::BitNot => {
                self.compile_expression(&unary.argument)?;
                self.buf.emit(Op::BitNot);
            }
        }
        Ok(())
    }

    fn compile_update(&mut self, update: &UpdateExpression) -> Result<()> {
        let mut flags = 0;
        if update.operator == UpdateOp::Decrement {
            flags |= INCDEC_DECREMENT;
        }
        if !update.prefix {
            flags |= INCDEC_POSTFIX;
        }

        match &*update.argument {
            Expression::Identifier(id) => match self.resolve(&id.name) {
                Binding::Slot(slot) => {
                    self.buf.emit_index_reg(slot);
                    self.buf.emit_u8(Op::VarIncDec, flags);
                }
                Binding::Name => {
                    self.buf.emit_string_reg(&id.name);
                    self.buf.emit_u8(Op::NameIncDec, flags);
                }
            },
            Expression::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Named(name) => {
                        self.buf.emit_string_reg(name);
                        self.buf.emit_u8(Op::PropIncDec, flags);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key)?;
                        self.buf.emit_u8(Op::ElemIncDec, flags);
                    }
                }
            }
            argument => {
                self.compile_expression(argument)?;
                self.buf.emit_u8(Op::RefIncDec, flags);
            }
        }
        Ok(())
    }

    fn compile_assignment(&mut self, assignment: &AssignmentExpression) -> Result<()> {
        let op = assignment
            .operator
            .binary_op()
            .map(|binary| self.binary_opcode(binary));

        match &*assignment.left {
            Expression::Identifier(id) => {
                if let Some(op) = op {
                    self.emit_load_name(&id.name);
                    self.compile_expression(&assignment.right)?;
                    self.buf.emit(op);
                } else {
                    self.compile_expression(&assignment.right)?;
                }
                self.emit_store_name(&id.name);
            }
            Expression::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Named(name) => {
                        if let Some(op) = op {
                            self.buf.emit(Op::Dup);
                            self.buf.emit_with_string(Op::GetProp, name);
                            self.compile_expression(&assignment.right)?;
                            self.buf.emit(op);
                        } else {
                            self.compile_expression(&assignment.right)?;
                        }
                        self.buf.emit_with_string(Op::SetProp, name);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key)?;
                        if let Some(op) = op {
                            self.buf.emit(Op::Dup2);
                            self.buf.emit(Op::GetElem);
                            self.compile_expression(&assignment.right)?;
                            self.buf.emit(op);
                        } else {
                            self.compile_expression(&assignment.right)?;
                        }
                        self.buf.emit(Op::SetElem);
                    }
                }
            }
            other => {
                return Err(CompileError::malformed(
                    "invalid assignment target",
                    other.location(),
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------

    /// Push the callee and its `this` according to the callee's shape, then
    /// the arguments, then the call.
    pub(crate) fn compile_call(&mut self, call: &CallExpression, tail: bool) -> Result<()> {
        match &*call.callee {
            Expression::Identifier(id) => match self.resolve(&id.name) {
                Binding::Slot(slot) => {
                    self.emit_get_var(slot);
                    self.buf.emit(Op::ValueAndThis);
                }
                Binding::Name => self.buf.emit_with_string(Op::NameAndThis, &id.name),
            },
            Expression::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Named(name) => {
                        self.buf.emit_with_string(Op::PropAndThis, name)
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key)?;
                        self.buf.emit(Op::ElemAndThis);
                    }
                }
            }
            callee => {
                self.compile_expression(callee)?;
                self.buf.emit(Op::ValueAndThis);
            }
        }

        for arg in &call.arguments {
            self.compile_expression(arg)?;
        }
        let op = if tail { Op::TailCall } else { Op::Call };
        self.buf.emit_call(op, call.arguments.len())
    }
}
