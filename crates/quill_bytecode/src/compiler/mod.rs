mod expressions;
mod hoist;
mod statements;

use std::rc::Rc;

use indexmap::IndexSet;
use quill_ast::*;
use quill_common::{CompileError, Result};
use tracing::debug;

use crate::buffer::{CodeBuffer, Label, UnitHeader};
use crate::opcode::Op;
use crate::unit::{CompiledUnit, FunctionKind, UnitFlags};
use crate::Environment;

// ---------------------------------------------------------------------------
// Internal bookkeeping types
// ---------------------------------------------------------------------------

/// Where a name lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    /// A frame variable slot.
    Slot(u32),
    /// Resolved through the scope chain by name.
    Name,
}

/// A construct that `break`, `continue` or `return` may have to leave.
#[derive(Debug, Clone)]
pub(crate) enum ControlKind {
    Loop { continue_label: Label },
    Switch,
    /// A labelled statement that is neither a loop nor a switch.
    Labeled,
    /// The protected block of a `try`; no tail calls from here.
    TryBody,
    /// A `catch` body; leaving it restores the saved scope.
    CatchScope { scope_local: u32 },
    /// Inside a `try` or `catch` that has a `finally`; leaving runs it.
    Finally { subroutine: Label, local: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct Control {
    pub(crate) kind: ControlKind,
    pub(crate) labels: Vec<String>,
    pub(crate) break_label: Option<Label>,
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// AST-to-icode compiler.
///
/// Each `Compiler` lowers exactly one unit (script or function body).
/// Nested functions are compiled by a child `Compiler` and attached to the
/// parent's nested-unit table.
pub struct Compiler<'env> {
    pub(crate) env: &'env Environment,
    pub(crate) buf: CodeBuffer,
    pub(crate) name: Rc<str>,
    pub(crate) source_name: Rc<str>,
    pub(crate) kind: FunctionKind,
    pub(crate) top_level: bool,
    pub(crate) needs_activation: bool,
    /// Parameters first, then hoisted vars and function names.
    pub(crate) vars: IndexSet<Rc<str>>,
    pub(crate) param_count: usize,
    pub(crate) self_var: Option<u32>,
    pub(crate) nested: Vec<Rc<CompiledUnit>>,
    pub(crate) controls: Vec<Control>,
    /// Labels waiting for the loop or switch they prefix.
    pub(crate) pending_labels: Vec<String>,
    /// Catch parameters in scope, innermost last.
    pub(crate) catch_names: Vec<String>,
    pub(crate) local_top: u32,
    pub(crate) max_locals: u32,
}

impl<'env> Compiler<'env> {
    // ------------------------------------------------------------------
    //  Public entry points
    // ------------------------------------------------------------------

    /// Compile a script into its top-level unit.
    pub fn compile_program(program: &Program, env: &'env Environment) -> Result<CompiledUnit> {
        let source_name = program
            .source_name
            .as_deref()
            .map(Rc::from)
            .unwrap_or_else(|| env.source_name.clone());
        let mut compiler = Compiler::new(env, source_name, Rc::from(""), FunctionKind::Script);
        compiler.top_level = true;

        compiler.declare_hoisted(&program.body);
        compiler.compile_hoisted_functions(&program.body)?;
        compiler.compile_body(&program.body)?;
        compiler.buf.emit(Op::ReturnResult);
        compiler.finish()
    }

    /// Compile a single function into its own unit.
    pub fn compile_standalone_function(
        function: &FunctionDeclaration,
        env: &'env Environment,
    ) -> Result<CompiledUnit> {
        Compiler::compile_function_body(env, env.source_name.clone(), function, FunctionKind::Expression)
    }

    // ------------------------------------------------------------------
    //  Constructor
    // ------------------------------------------------------------------

    pub(crate) fn new(
        env: &'env Environment,
        source_name: Rc<str>,
        name: Rc<str>,
        kind: FunctionKind,
    ) -> Self {
        Compiler {
            env,
            buf: CodeBuffer::new(),
            name,
            source_name,
            kind,
            top_level: false,
            needs_activation: false,
            vars: IndexSet::new(),
            param_count: 0,
            self_var: None,
            nested: Vec::new(),
            controls: Vec::new(),
            pending_labels: Vec::new(),
            catch_names: Vec::new(),
            local_top: 0,
            max_locals: 0,
        }
    }

    fn compile_function_body(
        env: &'env Environment,
        source_name: Rc<str>,
        function: &FunctionDeclaration,
        kind: FunctionKind,
    ) -> Result<CompiledUnit> {
        let name: Rc<str> = Rc::from(function.id.as_deref().unwrap_or(""));
        let mut compiler = Compiler::new(env, source_name, name, kind);
        for param in &function.params {
            compiler.vars.insert(Rc::from(param.as_str()));
        }
        compiler.param_count = compiler.vars.len();

        let body = &function.body.body;
        compiler.declare_hoisted(body);
        compiler.needs_activation = env.require_activation || hoist::contains_functions(body);

        if kind == FunctionKind::Expression {
            if let Some(id) = &function.id {
                if !compiler.vars.contains(id.as_str()) {
                    let (index, _) = compiler.vars.insert_full(Rc::from(id.as_str()));
                    compiler.self_var = Some(index as u32);
                }
            }
        }

        compiler.compile_hoisted_functions(body)?;
        compiler.compile_body(body)?;
        compiler.buf.emit(Op::ReturnUndef);
        compiler.finish()
    }

    /// Compile a nested function and return its index in the nested table.
    pub(crate) fn compile_nested(
        &mut self,
        function: &FunctionDeclaration,
        kind: FunctionKind,
    ) -> Result<u32> {
        let unit =
            Compiler::compile_function_body(self.env, self.source_name.clone(), function, kind)?;
        let index = u32::try_from(self.nested.len())
            .map_err(|_| CompileError::TableOverflow { table: "function" })?;
        self.nested.push(Rc::new(unit));
        Ok(index)
    }

    fn finish(self) -> Result<CompiledUnit> {
        self.expect_depth(0)?;
        let header = UnitHeader {
            name: self.name,
            source_name: self.source_name,
            kind: self.kind,
            flags: UnitFlags {
                needs_activation: self.needs_activation,
                dynamic_scope: self.env.dynamic_scope,
                top_level: self.top_level,
            },
            language_version: self.env.language_version,
            security_domain: self.env.security_domain.clone(),
            var_names: self.vars.into_iter().collect(),
            param_count: self.param_count,
            self_var: self.self_var,
            max_locals: self.max_locals,
            nested: self.nested,
        };
        let unit = self.buf.finish(header)?;
        debug!(
            unit = unit.display_name(),
            bytes = unit.code.len(),
            max_stack = unit.max_stack,
            nested = unit.nested.len(),
            "compiled unit"
        );
        Ok(unit)
    }

    // ------------------------------------------------------------------
    //  Hoisting
    // ------------------------------------------------------------------

    fn declare_hoisted(&mut self, body: &[Statement]) {
        let mut names = Vec::new();
        hoist::collect_var_names(body, &mut names);
        for name in names {
            if !self.vars.contains(name) {
                self.vars.insert(Rc::from(name));
            }
        }
    }

    /// Emit closures for the function declarations directly in `body`.
    fn compile_hoisted_functions(&mut self, body: &[Statement]) -> Result<()> {
        for stmt in body {
            if let Statement::FunctionDeclaration(function) = stmt {
                if function.id.is_none() {
                    return Err(CompileError::malformed(
                        "function declaration without a name",
                        function.location,
                    ));
                }
                let index = self.compile_nested(function, FunctionKind::Declaration)?;
                self.buf.emit_with_index(Op::ClosureStmt, index);
            }
        }
        Ok(())
    }

    /// Compile a body whose function declarations were already hoisted.
    fn compile_body(&mut self, body: &[Statement]) -> Result<()> {
        for stmt in body {
            if matches!(stmt, Statement::FunctionDeclaration(_)) {
                continue;
            }
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Names
    // ------------------------------------------------------------------

    pub(crate) fn resolve(&self, name: &str) -> Binding {
        if self.top_level || self.needs_activation || self.catch_names.iter().any(|n| n == name) {
            return Binding::Name;
        }
        match self.vars.get_index_of(name) {
            Some(index) => Binding::Slot(index as u32),
            None => Binding::Name,
        }
    }

    pub(crate) fn emit_get_var(&mut self, slot: u32) {
        match u8::try_from(slot) {
            Ok(small) => self.buf.emit_u8(Op::GetVar1, small),
            Err(_) => self.buf.emit_with_index(Op::GetVar, slot),
        }
    }

    pub(crate) fn emit_set_var(&mut self, slot: u32) {
        match u8::try_from(slot) {
            Ok(small) => self.buf.emit_u8(Op::SetVar1, small),
            Err(_) => self.buf.emit_with_index(Op::SetVar, slot),
        }
    }

    /// Push the value bound to `name`.
    pub(crate) fn emit_load_name(&mut self, name: &str) {
        match self.resolve(name) {
            Binding::Slot(slot) => self.emit_get_var(slot),
            Binding::Name => self.buf.emit_with_string(Op::Name, name),
        }
    }

    /// Store the value on top of the stack into `name`, leaving it there.
    pub(crate) fn emit_store_name(&mut self, name: &str) {
        match self.resolve(name) {
            Binding::Slot(slot) => self.emit_set_var(slot),
            Binding::Name => self.buf.emit_with_string(Op::SetName, name),
        }
    }

    // ------------------------------------------------------------------
    //  Frame locals
    // ------------------------------------------------------------------

    pub(crate) fn alloc_local(&mut self) -> Result<u32> {
        let local = self.local_top;
        if local > u8::MAX as u32 {
            return Err(CompileError::TableOverflow { table: "local" });
        }
        self.local_top += 1;
        self.max_locals = self.max_locals.max(self.local_top);
        Ok(local)
    }

    pub(crate) fn release_locals(&mut self, count: u32) {
        self.local_top -= count;
    }

    // ------------------------------------------------------------------
    //  Stack balance
    // ------------------------------------------------------------------

    pub(crate) fn expect_depth(&self, expected: i32) -> Result<()> {
        let found = self.buf.stack_depth();
        if found != expected {
            return Err(CompileError::StackImbalance {
                unit: self.name.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Control stack
    // ------------------------------------------------------------------

    pub(crate) fn push_control(&mut self, kind: ControlKind, labels: Vec<String>, break_label: Option<Label>) {
        self.controls.push(Control {
            kind,
            labels,
            break_label,
        });
    }

    pub(crate) fn pop_control(&mut self) {
        self.controls.pop();
    }

    /// `true` when a `return` here must not replace the frame.
    pub(crate) fn in_protected_region(&self) -> bool {
        self.controls.iter().any(|c| {
            matches!(
                c.kind,
                ControlKind::TryBody | ControlKind::CatchScope { .. } | ControlKind::Finally { .. }
            )
        })
    }

    /// Emit what leaving every control above `depth` requires: scope
    /// restores for catch bodies and subroutine calls for finally blocks.
    pub(crate) fn emit_exits(&mut self, depth: usize) {
        let exits: Vec<ControlKind> = self.controls[depth..]
            .iter()
            .rev()
            .map(|c| c.kind.clone())
            .collect();
        for kind in exits {
            match kind {
                ControlKind::CatchScope { scope_local } => {
                    self.buf.emit_u8(Op::ScopeLoad, scope_local as u8);
                }
                ControlKind::Finally { subroutine, local } => {
                    self.emit_gosub(subroutine, local);
                }
                _ => {}
            }
        }
    }

    pub(crate) fn emit_gosub(&mut self, subroutine: Label, local: u32) {
        self.buf.emit_index_reg(local);
        self.buf.emit_jump(Op::Gosub, subroutine);
    }
}

#[cfg(test)]
mod tests;
