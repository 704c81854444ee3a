use quill_ast::*;
use quill_common::{CompileError, Result};

use crate::opcode::Op;
use crate::unit::{FunctionKind, HandlerKind};

use super::{Compiler, ControlKind};

impl Compiler<'_> {
    // ------------------------------------------------------------------
    //  Statements
    // ------------------------------------------------------------------

    /// Lower one statement. Statements leave the stack as they found it.
    pub(crate) fn compile_statement(&mut self, stmt: &Statement) -> Result<()> {
        let depth = self.buf.stack_depth();
        if !matches!(stmt, Statement::Block(_) | Statement::Labeled(_)) {
            if let Some(location) = stmt.location() {
                self.buf.emit_line(location.line);
            }
        }

        match stmt {
            Statement::Expression(es) => self.compile_expression_statement(es)?,
            Statement::VariableDeclaration(vd) => self.compile_variable_declaration(vd)?,
            Statement::FunctionDeclaration(function) => self.compile_function_statement(function)?,
            Statement::Return(ret) => self.compile_return(ret)?,
            Statement::If(if_stmt) => self.compile_if(if_stmt)?,
            Statement::While(while_stmt) => self.compile_while(while_stmt)?,
            Statement::DoWhile(do_while) => self.compile_do_while(do_while)?,
            Statement::For(for_stmt) => self.compile_for(for_stmt)?,
            Statement::ForIn(for_in) => self.compile_for_in(for_in)?,
            Statement::Block(block) => {
                for stmt in &block.body {
                    self.compile_statement(stmt)?;
                }
            }
            Statement::Break(brk) => self.compile_break(brk)?,
            Statement::Continue(cont) => self.compile_continue(cont)?,
            Statement::Switch(sw) => self.compile_switch(sw)?,
            Statement::Throw(th) => {
                self.compile_expression(&th.argument)?;
                self.buf.emit(Op::Throw);
            }
            Statement::Try(try_stmt) => self.compile_try(try_stmt)?,
            Statement::Labeled(labeled) => self.compile_labeled(labeled)?,
            Statement::Empty => {}
        }

        self.expect_depth(depth)
    }

    fn compile_expression_statement(&mut self, es: &ExpressionStatement) -> Result<()> {
        self.compile_expression(&es.expression)?;
        if self.top_level {
            self.buf.emit(Op::PopResult);
        } else {
            self.buf.emit(Op::Pop);
        }
        Ok(())
    }

    pub(crate) fn compile_variable_declaration(&mut self, vd: &VariableDeclaration) -> Result<()> {
        for decl in &vd.declarations {
            // Already hoisted; only initializers produce code.
            if let Some(init) = &decl.init {
                self.compile_expression(init)?;
                self.emit_store_name(&decl.name);
                self.buf.emit(Op::Pop);
            }
        }
        Ok(())
    }

    /// A function declaration nested in a block: bound when reached.
    fn compile_function_statement(&mut self, function: &FunctionDeclaration) -> Result<()> {
        let Some(name) = &function.id else {
            return Err(CompileError::malformed(
                "function declaration without a name",
                function.location,
            ));
        };
        let index = self.compile_nested(function, FunctionKind::Declaration)?;
        self.buf.emit_with_index(Op::ClosureExpr, index);
        self.emit_store_name(name);
        self.buf.emit(Op::Pop);
        Ok(())
    }

    fn compile_return(&mut self, ret: &ReturnStatement) -> Result<()> {
        if self.top_level {
            return Err(CompileError::malformed("return outside of a function", ret.location));
        }
        let through_finally = self
            .controls
            .iter()
            .any(|c| matches!(c.kind, ControlKind::Finally { .. }));

        match &ret.argument {
            Some(Expression::Call(call)) if !self.in_protected_region() => {
                self.compile_call(call, true)?;
                self.buf.emit(Op::Return);
            }
            Some(argument) if through_finally => {
                self.compile_expression(argument)?;
                self.buf.emit(Op::PopResult);
                self.emit_exits(0);
                self.buf.emit(Op::ReturnResult);
            }
            Some(argument) => {
                self.compile_expression(argument)?;
                self.buf.emit(Op::Return);
            }
            None if through_finally => {
                self.buf.emit(Op::Undef);
                self.buf.emit(Op::PopResult);
                self.emit_exits(0);
                self.buf.emit(Op::ReturnResult);
            }
            None => self.buf.emit(Op::ReturnUndef),
        }
        Ok(())
    }

    fn compile_if(&mut self, if_stmt: &IfStatement) -> Result<()> {
        self.compile_expression(&if_stmt.test)?;
        let else_label = self.buf.new_label();
        self.buf.emit_jump(Op::IfEq, else_label);
        self.compile_statement(&if_stmt.consequent)?;

        match &if_stmt.alternate {
            Some(alternate) => {
                let end = self.buf.new_label();
                self.buf.emit_jump(Op::Goto, end);
                self.buf.mark_label(else_label)?;
                self.compile_statement(alternate)?;
                self.buf.mark_label(end)?;
            }
            None => self.buf.mark_label(else_label)?,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Loops
    // ------------------------------------------------------------------

    fn take_labels(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_labels)
    }

    fn compile_while(&mut self, while_stmt: &WhileStatement) -> Result<()> {
        let labels = self.take_labels();
        let body = self.buf.new_label();
        let cond = self.buf.new_label();
        let exit = self.buf.new_label();

        self.buf.emit_jump(Op::Goto, cond);
        self.buf.mark_label(body)?;
        self.push_control(ControlKind::Loop { continue_label: cond }, labels, Some(exit));
        self.compile_statement(&while_stmt.body)?;
        self.pop_control();

        self.buf.mark_label(cond)?;
        self.compile_expression(&while_stmt.test)?;
        self.buf.emit_jump(Op::IfNe, body);
        self.buf.mark_label(exit)
    }

    fn compile_do_while(&mut self, do_while: &DoWhileStatement) -> Result<()> {
        let labels = self.take_labels();
        let body = self.buf.new_label();
        let cond = self.buf.new_label();
        let exit = self.buf.new_label();

        self.buf.mark_label(body)?;
        self.push_control(ControlKind::Loop { continue_label: cond }, labels, Some(exit));
        self.compile_statement(&do_while.body)?;
        self.pop_control();

        self.buf.mark_label(cond)?;
        self.compile_expression(&do_while.test)?;
        self.buf.emit_jump(Op::IfNe, body);
        self.buf.mark_label(exit)
    }

    fn compile_for(&mut self, for_stmt: &ForStatement) -> Result<()> {
        let labels = self.take_labels();
        match &for_stmt.init {
            Some(ForInit::VariableDeclaration(vd)) => self.compile_variable_declaration(vd)?,
            Some(ForInit::Expression(init)) => {
                self.compile_expression(init)?;
                self.buf.emit(Op::Pop);
            }
            None => {}
        }

        let body = self.buf.new_label();
        let next = self.buf.new_label();
        let cond = self.buf.new_label();
        let exit = self.buf.new_label();

        self.buf.emit_jump(Op::Goto, cond);
        self.buf.mark_label(body)?;
        self.push_control(ControlKind::Loop { continue_label: next }, labels, Some(exit));
        self.compile_statement(&for_stmt.body)?;
        self.pop_control();

        self.buf.mark_label(next)?;
        if let Some(update) = &for_stmt.update {
            self.compile_expression(update)?;
            self.buf.emit(Op::Pop);
        }
        self.buf.mark_label(cond)?;
        match &for_stmt.test {
            Some(test) => {
                self.compile_expression(test)?;
                self.buf.emit_jump(Op::IfNe, body);
            }
            None => self.buf.emit_jump(Op::Goto, body),
        }
        self.buf.mark_label(exit)
    }

    fn compile_for_in(&mut self, for_in: &ForInStatement) -> Result<()> {
        let labels = self.take_labels();
        let local = self.alloc_local()?;

        self.compile_expression(&for_in.right)?;
        self.buf.emit_local(Op::EnumInit, local)?;

        let body = self.buf.new_label();
        let cond = self.buf.new_label();
        let exit = self.buf.new_label();

        self.buf.emit_jump(Op::Goto, cond);
        self.buf.mark_label(body)?;
        self.compile_for_in_target(&for_in.left, local)?;
        self.push_control(ControlKind::Loop { continue_label: cond }, labels, Some(exit));
        self.compile_statement(&for_in.body)?;
        self.pop_control();

        self.buf.mark_label(cond)?;
        self.buf.emit_local(Op::EnumNext, local)?;
        self.buf.emit_jump(Op::IfNe, body);
        self.buf.mark_label(exit)?;
        self.buf.emit_local(Op::LocalClear, local)?;
        self.release_locals(1);
        Ok(())
    }

    /// Store the enumerator's current key into the loop target.
    fn compile_for_in_target(&mut self, left: &ForInLeft, local: u32) -> Result<()> {
        match left {
            ForInLeft::Var(name) => {
                self.buf.emit_local(Op::EnumId, local)?;
                self.emit_store_name(name);
            }
            ForInLeft::Target(Expression::Identifier(id)) => {
                self.buf.emit_local(Op::EnumId, local)?;
                self.emit_store_name(&id.name);
            }
            ForInLeft::Target(Expression::Member(m)) => {
                self.compile_expression(&m.object)?;
                match &m.property {
                    MemberProperty::Named(name) => {
                        self.buf.emit_local(Op::EnumId, local)?;
                        self.buf.emit_with_string(Op::SetProp, name);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key)?;
                        self.buf.emit_local(Op::EnumId, local)?;
                        self.buf.emit(Op::SetElem);
                    }
                }
            }
            ForInLeft::Target(other) => {
                return Err(CompileError::malformed(
                    "invalid for-in target",
                    other.location(),
                ));
            }
        }
        self.buf.emit(Op::Pop);
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Jumps
    // ------------------------------------------------------------------

    fn compile_break(&mut self, brk: &BreakStatement) -> Result<()> {
        let target = match &brk.label {
            None => self
                .controls
                .iter()
                .rposition(|c| matches!(c.kind, ControlKind::Loop { .. } | ControlKind::Switch))
                .ok_or(CompileError::StrayJump {
                    keyword: "break",
                    location: brk.location,
                })?,
            Some(label) => self.find_labeled(label, brk.location)?,
        };
        let Some(exit) = self.controls[target].break_label else {
            return Err(CompileError::malformed("break target has no exit", brk.location));
        };
        self.emit_exits(target + 1);
        self.buf.emit_jump(Op::Goto, exit);
        Ok(())
    }

    fn compile_continue(&mut self, cont: &ContinueStatement) -> Result<()> {
        let stray = CompileError::StrayJump {
            keyword: "continue",
            location: cont.location,
        };
        let target = match &cont.label {
            None => self
                .controls
                .iter()
                .rposition(|c| matches!(c.kind, ControlKind::Loop { .. }))
                .ok_or(stray.clone())?,
            Some(label) => self.find_labeled(label, cont.location)?,
        };
        let ControlKind::Loop { continue_label } = self.controls[target].kind else {
            return Err(stray);
        };
        self.emit_exits(target + 1);
        self.buf.emit_jump(Op::Goto, continue_label);
        Ok(())
    }

    fn find_labeled(&self, label: &str, location: quill_common::SourceLocation) -> Result<usize> {
        self.controls
            .iter()
            .rposition(|c| c.labels.iter().any(|l| l == label))
            .ok_or_else(|| CompileError::UndefinedLabel {
                label: label.to_string(),
                location,
            })
    }

    fn compile_labeled(&mut self, labeled: &LabeledStatement) -> Result<()> {
        self.pending_labels.push(labeled.label.clone());
        match &*labeled.body {
            Statement::While(_)
            | Statement::DoWhile(_)
            | Statement::For(_)
            | Statement::ForIn(_)
            | Statement::Switch(_)
            | Statement::Labeled(_) => self.compile_statement(&labeled.body),
            body => {
                let labels = self.take_labels();
                let exit = self.buf.new_label();
                self.push_control(ControlKind::Labeled, labels, Some(exit));
                self.compile_statement(body)?;
                self.pop_control();
                self.buf.mark_label(exit)
            }
        }
    }

    // ------------------------------------------------------------------
    //  switch
    // ------------------------------------------------------------------

    fn compile_switch(&mut self, sw: &SwitchStatement) -> Result<()> {
        let labels = self.take_labels();
        self.compile_expression(&sw.discriminant)?;

        let exit = self.buf.new_label();
        let case_labels: Vec<_> = sw.cases.iter().map(|_| self.buf.new_label()).collect();
        let mut default = None;

        for (case, &label) in sw.cases.iter().zip(&case_labels) {
            match &case.test {
                Some(test) => {
                    self.buf.emit(Op::Dup);
                    self.compile_expression(test)?;
                    self.buf.emit(Op::ShEq);
                    self.buf.emit_jump(Op::IfEqPop, label);
                }
                None if default.is_some() => {
                    return Err(CompileError::malformed(
                        "more than one default clause",
                        case.location,
                    ));
                }
                None => default = Some(label),
            }
        }
        self.buf.emit(Op::Pop);
        self.buf.emit_jump(Op::Goto, default.unwrap_or(exit));

        self.push_control(ControlKind::Switch, labels, Some(exit));
        for (case, &label) in sw.cases.iter().zip(&case_labels) {
            self.buf.mark_label(label)?;
            for stmt in &case.consequent {
                self.compile_statement(stmt)?;
            }
        }
        self.pop_control();
        self.buf.mark_label(exit)
    }

    // ------------------------------------------------------------------
    //  try / catch / finally
    // ------------------------------------------------------------------

    fn compile_try(&mut self, try_stmt: &TryStatement) -> Result<()> {
        let scope_local = self.alloc_local()?;
        let catch_local = match &try_stmt.handler {
            Some(_) => Some(self.alloc_local()?),
            None => None,
        };
        let finally = match &try_stmt.finalizer {
            Some(_) => Some((self.buf.new_label(), self.alloc_local()?)),
            None => None,
        };
        let allocated = 1 + u32::from(catch_local.is_some()) + u32::from(finally.is_some());
        let end = self.buf.new_label();

        self.buf.emit_local(Op::ScopeSave, scope_local)?;
        if let Some((subroutine, local)) = finally {
            self.push_control(ControlKind::Finally { subroutine, local }, Vec::new(), None);
        }

        let try_start = self.buf.pc();
        self.push_control(ControlKind::TryBody, Vec::new(), None);
        for stmt in &try_stmt.block.body {
            self.compile_statement(stmt)?;
        }
        self.pop_control();
        let try_end = self.buf.pc();
        if let Some((subroutine, local)) = finally {
            self.emit_gosub(subroutine, local);
        }
        self.buf.emit_jump(Op::Goto, end);

        let mut protected_end = try_end;
        if let (Some(handler), Some(exception_local)) = (&try_stmt.handler, catch_local) {
            let entry = self.buf.pc();
            self.buf.add_handler(
                try_start,
                try_end,
                entry,
                HandlerKind::Catch,
                exception_local,
                scope_local,
            );
            self.push_control(ControlKind::CatchScope { scope_local }, Vec::new(), None);
            self.buf.emit_local(Op::LocalLoad, exception_local)?;
            self.buf.emit_with_string(Op::CatchScope, &handler.param);
            self.catch_names.push(handler.param.clone());
            for stmt in &handler.body.body {
                self.compile_statement(stmt)?;
            }
            self.catch_names.pop();
            self.pop_control();
            self.buf.emit_local(Op::ScopeLoad, scope_local)?;
            protected_end = self.buf.pc();
            if let Some((subroutine, local)) = finally {
                self.emit_gosub(subroutine, local);
            }
            self.buf.emit_jump(Op::Goto, end);
        }

        if let (Some((subroutine, local)), Some(finalizer)) = (finally, &try_stmt.finalizer) {
            self.pop_control();
            let entry = self.buf.pc();
            self.buf.add_handler(
                try_start,
                protected_end,
                entry,
                HandlerKind::Finally,
                local,
                scope_local,
            );
            self.buf.mark_label(subroutine)?;
            for stmt in &finalizer.body {
                self.compile_statement(stmt)?;
            }
            self.buf.emit_local(Op::RetSub, local)?;
        }

        self.buf.mark_label(end)?;
        self.release_locals(allocated);
        Ok(())
    }
}
