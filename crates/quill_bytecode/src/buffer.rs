use std::rc::Rc;

use indexmap::IndexSet;
use quill_common::{CompileError, Result};
use rustc_hash::FxHashMap;

use crate::opcode::{Op, OperandFormat};
use crate::unit::{
    CompiledUnit, ExceptionHandler, FunctionKind, HandlerKind, LiteralId, RegExpLiteral, UnitFlags,
};

/// A forward or backward jump target, created unbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Everything about a unit that the code buffer does not collect itself.
#[derive(Debug, Clone)]
pub struct UnitHeader {
    pub name: Rc<str>,
    pub source_name: Rc<str>,
    pub kind: FunctionKind,
    pub flags: UnitFlags,
    pub language_version: u16,
    pub security_domain: Option<Rc<str>>,
    pub var_names: Vec<Rc<str>>,
    pub param_count: usize,
    pub self_var: Option<u32>,
    pub max_locals: u32,
    pub nested: Vec<Rc<CompiledUnit>>,
}

/// Growable icode buffer plus the side tables that travel with it.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    strings: IndexSet<Rc<str>>,
    doubles: Vec<f64>,
    literal_ids: Vec<LiteralId>,
    regexps: Vec<RegExpLiteral>,
    /// Bound address per label, `None` while unbound.
    labels: Vec<Option<u32>>,
    /// `(label, operand address)` pairs awaiting their label.
    fixups: Vec<(Label, u32)>,
    handlers: Vec<ExceptionHandler>,
    long_jumps: FxHashMap<u32, u32>,
    lines: Vec<(u32, u32)>,
    last_line: Option<u32>,
    stack_depth: i32,
    max_stack: i32,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the next byte will be written at.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    // ------------------------------------------------------------------
    //  Stack depth
    // ------------------------------------------------------------------

    pub fn stack_depth(&self) -> i32 {
        self.stack_depth
    }

    pub fn max_stack(&self) -> i32 {
        self.max_stack
    }

    /// Apply a stack change not implied by an opcode, e.g. at a join point.
    pub fn adjust_stack(&mut self, delta: i32) {
        self.stack_depth += delta;
        if self.stack_depth > self.max_stack {
            self.max_stack = self.stack_depth;
        }
    }

    // ------------------------------------------------------------------
    //  Emit helpers
    // ------------------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    fn start_op(&mut self, op: Op) {
        self.emit_byte(op as u8);
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    pub fn emit(&mut self, op: Op) {
        debug_assert_eq!(op.format(), OperandFormat::None, "{} takes an operand", op);
        self.start_op(op);
    }

    pub fn emit_u8(&mut self, op: Op, operand: u8) {
        debug_assert_eq!(op.format(), OperandFormat::U8, "{}", op);
        self.start_op(op);
        self.emit_byte(operand);
    }

    /// Emit an op with a frame-local operand.
    pub fn emit_local(&mut self, op: Op, local: u32) -> Result<()> {
        let local = u8::try_from(local).map_err(|_| CompileError::TableOverflow { table: "local" })?;
        self.emit_u8(op, local);
        Ok(())
    }

    pub fn emit_u16(&mut self, op: Op, operand: u16) {
        debug_assert!(matches!(op.format(), OperandFormat::U16 | OperandFormat::I16));
        self.start_op(op);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    pub fn emit_u32(&mut self, op: Op, operand: u32) {
        debug_assert!(matches!(op.format(), OperandFormat::U32 | OperandFormat::I32));
        self.start_op(op);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    /// Emit a call-shaped op. Calls pop the callee, `this` (calls only) and
    /// every argument, then push one result.
    pub fn emit_call(&mut self, op: Op, argc: usize) -> Result<()> {
        let count =
            u16::try_from(argc).map_err(|_| CompileError::TableOverflow { table: "argument" })?;
        self.emit_byte(op as u8);
        self.code.extend_from_slice(&count.to_be_bytes());
        let consumed = match op {
            Op::New => argc as i32,
            _ => argc as i32 + 1,
        };
        self.adjust_stack(-consumed);
        Ok(())
    }

    /// Emit a line instruction when `line` differs from the last one.
    pub fn emit_line(&mut self, line: u32) {
        if line == 0 || self.last_line == Some(line) {
            return;
        }
        self.last_line = Some(line);
        self.lines.push((self.pc() as u32, line));
        self.start_op(Op::Line);
        let encoded = line.min(u16::MAX as u32) as u16;
        self.code.extend_from_slice(&encoded.to_be_bytes());
    }

    /// Load the index register using the smallest encoding.
    pub fn emit_index_reg(&mut self, index: u32) {
        if let Some(op) = Op::inline_index_reg(index) {
            self.emit(op);
        } else if let Ok(small) = u8::try_from(index) {
            self.emit_u8(Op::RegInd1, small);
        } else if let Ok(short) = u16::try_from(index) {
            self.emit_u16(Op::RegInd2, short);
        } else {
            self.emit_u32(Op::RegInd4, index);
        }
    }

    /// Intern `value` and load the string register with its index.
    pub fn emit_string_reg(&mut self, value: &str) -> u32 {
        let index = self.intern(value);
        if let Some(op) = Op::inline_string_reg(index) {
            self.emit(op);
        } else if let Ok(small) = u8::try_from(index) {
            self.emit_u8(Op::RegStr1, small);
        } else if let Ok(short) = u16::try_from(index) {
            self.emit_u16(Op::RegStr2, short);
        } else {
            self.emit_u32(Op::RegStr4, index);
        }
        index
    }

    /// String-register load immediately followed by `op`.
    pub fn emit_with_string(&mut self, op: Op, value: &str) {
        self.emit_string_reg(value);
        self.emit(op);
    }

    /// Index-register load immediately followed by `op`.
    pub fn emit_with_index(&mut self, op: Op, index: u32) {
        self.emit_index_reg(index);
        self.emit(op);
    }

    // ------------------------------------------------------------------
    //  Tables
    // ------------------------------------------------------------------

    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(index) = self.strings.get_index_of(value) {
            return index as u32;
        }
        let (index, _) = self.strings.insert_full(Rc::from(value));
        index as u32
    }

    pub fn add_double(&mut self, value: f64) -> u32 {
        self.doubles.push(value);
        (self.doubles.len() - 1) as u32
    }

    pub fn add_literal_id(&mut self, id: LiteralId) -> u32 {
        self.literal_ids.push(id);
        (self.literal_ids.len() - 1) as u32
    }

    pub fn add_regexp(&mut self, literal: RegExpLiteral) -> u32 {
        self.regexps.push(literal);
        (self.regexps.len() - 1) as u32
    }

    pub fn add_handler(
        &mut self,
        start: usize,
        end: usize,
        handler: usize,
        kind: HandlerKind,
        exception_local: u32,
        scope_local: u32,
    ) {
        self.handlers.push(ExceptionHandler {
            start: start as u32,
            end: end as u32,
            handler: handler as u32,
            kind,
            exception_local,
            scope_local,
        });
    }

    // ------------------------------------------------------------------
    //  Labels and jumps
    // ------------------------------------------------------------------

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the current address and patch every jump waiting on it.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let here = self.pc() as u32;
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(CompileError::LabelRebound { label: label.0 });
        }
        *slot = Some(here);

        let mut i = 0;
        while i < self.fixups.len() {
            if self.fixups[i].0 == label {
                let (_, site) = self.fixups.swap_remove(i);
                self.patch_jump(site, here);
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    pub fn is_marked(&self, label: Label) -> bool {
        self.labels[label.0 as usize].is_some()
    }

    /// Emit a jump-format op targeting `label`.
    pub fn emit_jump(&mut self, op: Op, label: Label) {
        debug_assert!(op.is_jump(), "{} is not a jump", op);
        self.start_op(op);
        let site = self.pc() as u32;
        self.code.extend_from_slice(&[0, 0]);
        match self.labels[label.0 as usize] {
            Some(target) => self.patch_jump(site, target),
            None => self.fixups.push((label, site)),
        }
    }

    /// Write the offset for the jump whose operand is at `site`, spilling to
    /// the long-jump table when it does not fit 16 bits.
    fn patch_jump(&mut self, site: u32, target: u32) {
        let offset = target as i64 - site as i64;
        let encoded = match i16::try_from(offset) {
            Ok(short) if short != 0 => short,
            _ => {
                self.long_jumps.insert(site, target);
                0
            }
        };
        let at = site as usize;
        self.code[at..at + 2].copy_from_slice(&encoded.to_be_bytes());
    }

    // ------------------------------------------------------------------
    //  Finalization
    // ------------------------------------------------------------------

    fn check_handlers(&self, unit: &str) -> Result<()> {
        let nonempty: Vec<&ExceptionHandler> =
            self.handlers.iter().filter(|h| h.start < h.end).collect();
        for (i, a) in nonempty.iter().enumerate() {
            for b in &nonempty[i + 1..] {
                let disjoint = a.end <= b.start || b.end <= a.start;
                let a_in_b = b.start <= a.start && a.end < b.end;
                let b_in_a = a.start <= b.start && b.end < a.end;
                if !(disjoint || a_in_b || b_in_a) {
                    return Err(CompileError::HandlerNesting {
                        start: b.start,
                        end: b.end,
                        unit: unit.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Seal the buffer into an immutable unit.
    pub fn finish(self, header: UnitHeader) -> Result<CompiledUnit> {
        if let Some((label, _)) = self.fixups.first() {
            return Err(CompileError::UnresolvedLabel {
                label: label.0,
                unit: header.name.to_string(),
            });
        }
        self.check_handlers(&header.name)?;

        Ok(CompiledUnit {
            name: header.name,
            source_name: header.source_name,
            kind: header.kind,
            flags: header.flags,
            language_version: header.language_version,
            security_domain: header.security_domain,
            code: self.code.into(),
            strings: self.strings.into_iter().collect(),
            doubles: self.doubles.into(),
            literal_ids: self.literal_ids.into(),
            regexps: self.regexps.into(),
            handlers: self.handlers.into(),
            long_jumps: self.long_jumps,
            lines: self.lines.into(),
            var_names: header.var_names.into(),
            param_count: header.param_count,
            self_var: header.self_var,
            max_stack: self.max_stack.max(0) as u32,
            max_locals: header.max_locals,
            nested: header.nested.into(),
        })
    }
}
