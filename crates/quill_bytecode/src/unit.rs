use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::opcode::{Op, OperandFormat};

/// Default language version: full equality semantics for `==`.
pub const DEFAULT_LANGUAGE_VERSION: u16 = 180;

/// Under this version `==` and `!=` compile to their strict forms.
pub const STRICT_EQUALITY_VERSION: u16 = 120;

/// What an exception-table record does when the dispatcher selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Entered for catchable faults only.
    Catch,
    /// Entered for every fault that unwinds through it.
    Finally,
}

/// One exception-table record.
///
/// Ranges are half-open. Records nest and never share an end address, so
/// the innermost record enclosing a PC is the one with the smallest end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    /// Address the dispatcher jumps to.
    pub handler: u32,
    pub kind: HandlerKind,
    /// Frame local that receives the caught value or pending fault.
    pub exception_local: u32,
    /// Frame local holding the scope saved on `try` entry.
    pub scope_local: u32,
}

impl ExceptionHandler {
    pub fn covers(&self, pc: usize) -> bool {
        (self.start as usize) <= pc && pc < self.end as usize
    }
}

/// Entry of the literal-id table.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralId {
    /// Keys of an object literal, in source order.
    PropertyNames(Box<[Rc<str>]>),
    /// Hole positions of a sparse array literal, plus its total length.
    SkipIndices { holes: Box<[u32]>, length: u32 },
}

/// A regular-expression literal as produced by the environment's
/// [`RegExpCompiler`](crate::RegExpCompiler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExpLiteral {
    pub source: Rc<str>,
    pub flags: Rc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    /// `function f() {}` in statement position.
    Declaration,
    /// A function value produced by an expression.
    Expression,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitFlags {
    /// Parameters and vars live on an activation object instead of slots.
    pub needs_activation: bool,
    /// Calls resolve free names through the caller's scope.
    pub dynamic_scope: bool,
    pub top_level: bool,
}

/// The immutable result of compiling one script or function body.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Function name; empty for scripts and anonymous functions.
    pub name: Rc<str>,
    pub source_name: Rc<str>,
    pub kind: FunctionKind,
    pub flags: UnitFlags,
    pub language_version: u16,
    pub security_domain: Option<Rc<str>>,

    pub code: Box<[u8]>,
    pub strings: Box<[Rc<str>]>,
    pub doubles: Box<[f64]>,
    pub literal_ids: Box<[LiteralId]>,
    pub regexps: Box<[RegExpLiteral]>,
    pub handlers: Box<[ExceptionHandler]>,
    /// Patch site -> absolute target, for jumps that do not fit 16 bits.
    pub long_jumps: FxHashMap<u32, u32>,
    /// `(pc, line)` pairs in code order.
    pub lines: Box<[(u32, u32)]>,

    /// Parameters first, then hoisted vars.
    pub var_names: Box<[Rc<str>]>,
    pub param_count: usize,
    /// Slot a named function expression binds itself to.
    pub self_var: Option<u32>,
    pub max_stack: u32,
    pub max_locals: u32,
    pub nested: Box<[Rc<CompiledUnit>]>,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    pub pc: usize,
    pub op: Op,
    /// Operand widened to `i64`; zero for operand-less opcodes. For jumps
    /// this is the resolved absolute target.
    pub operand: i64,
}

impl CompiledUnit {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            match self.kind {
                FunctionKind::Script => "<script>",
                _ => "<anonymous>",
            }
        } else {
            &self.name
        }
    }

    pub fn params(&self) -> &[Rc<str>] {
        &self.var_names[..self.param_count.min(self.var_names.len())]
    }

    // ------------------------------------------------------------------
    //  Operand readers
    // ------------------------------------------------------------------

    pub fn read_u8(&self, pc: usize) -> Option<u8> {
        self.code.get(pc).copied()
    }

    pub fn read_u16(&self, pc: usize) -> Option<u16> {
        let bytes = self.code.get(pc..pc + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i16(&self, pc: usize) -> Option<i16> {
        self.read_u16(pc).map(|v| v as i16)
    }

    pub fn read_u32(&self, pc: usize) -> Option<u32> {
        let bytes = self.code.get(pc..pc + 4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&self, pc: usize) -> Option<i32> {
        self.read_u32(pc).map(|v| v as i32)
    }

    /// Absolute target of the jump whose operand starts at `operand_pc`.
    pub fn jump_target(&self, operand_pc: usize) -> Option<usize> {
        let offset = self.read_i16(operand_pc)?;
        if offset == 0 {
            return self
                .long_jumps
                .get(&(operand_pc as u32))
                .map(|target| *target as usize);
        }
        let target = operand_pc as isize + offset as isize;
        usize::try_from(target).ok()
    }

    /// Decode the instruction at `pc`. `None` for an undefined opcode byte
    /// or a truncated operand.
    pub fn decode(&self, pc: usize) -> Option<Instruction> {
        let op = Op::from_byte(self.read_u8(pc)?)?;
        let at = pc + 1;
        let operand = match op.format() {
            OperandFormat::None => 0,
            OperandFormat::U8 => self.read_u8(at)? as i64,
            OperandFormat::U16 | OperandFormat::Line => self.read_u16(at)? as i64,
            OperandFormat::U32 => self.read_u32(at)? as i64,
            OperandFormat::I16 => self.read_i16(at)? as i64,
            OperandFormat::I32 => self.read_i32(at)? as i64,
            OperandFormat::Jump => self.jump_target(at)? as i64,
        };
        Some(Instruction { pc, op, operand })
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { unit: self, pc: 0 }
    }

    // ------------------------------------------------------------------
    //  Tables
    // ------------------------------------------------------------------

    /// Innermost exception record enclosing `pc`. With `finally_only`,
    /// catch records are skipped.
    pub fn find_handler(&self, pc: usize, finally_only: bool) -> Option<&ExceptionHandler> {
        let mut best: Option<&ExceptionHandler> = None;
        for record in self.handlers.iter() {
            if !record.covers(pc) {
                continue;
            }
            if finally_only && record.kind != HandlerKind::Finally {
                continue;
            }
            match best {
                Some(current) if current.end <= record.end => {}
                _ => best = Some(record),
            }
        }
        best
    }

    /// Source line of the statement that contains `pc`, or 0 when no line
    /// instruction precedes it.
    pub fn line_at(&self, pc: usize) -> u32 {
        let idx = self.lines.partition_point(|(at, _)| *at as usize <= pc);
        if idx == 0 {
            0
        } else {
            self.lines[idx - 1].1
        }
    }

    // ------------------------------------------------------------------
    //  Disassembly
    // ------------------------------------------------------------------

    /// Render this unit and its nested units.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(
            out,
            "=== {} [{}] (params={}, vars={}, locals={}, stack={}{}) ===",
            self.display_name(),
            self.source_name,
            self.param_count,
            self.var_names.len(),
            self.max_locals,
            self.max_stack,
            if self.flags.needs_activation { ", activation" } else { "" },
        );

        if !self.strings.is_empty() {
            out.push_str("Strings:\n");
            for (i, s) in self.strings.iter().enumerate() {
                let _ = writeln!(out, "  {:>4}: {:?}", i, s);
            }
        }
        if !self.doubles.is_empty() {
            out.push_str("Doubles:\n");
            for (i, d) in self.doubles.iter().enumerate() {
                let _ = writeln!(out, "  {:>4}: {}", i, d);
            }
        }

        out.push_str("Code:\n");
        let mut end = 0;
        for ins in self.instructions() {
            end = ins.pc + ins.op.length();
            match ins.op.format() {
                OperandFormat::None => {
                    let _ = writeln!(out, "  {:>5}: {}", ins.pc, ins.op);
                }
                OperandFormat::Jump => {
                    let _ = writeln!(out, "  {:>5}: {} -> {}", ins.pc, ins.op, ins.operand);
                }
                _ => {
                    let _ = writeln!(out, "  {:>5}: {} {}", ins.pc, ins.op, ins.operand);
                }
            }
        }
        if end < self.code.len() {
            let _ = writeln!(out, "  {:>5}: <bad opcode 0x{:02x}>", end, self.code[end]);
        }

        if !self.handlers.is_empty() {
            out.push_str("Exceptions:\n");
            for h in self.handlers.iter() {
                let _ = writeln!(
                    out,
                    "  [{}, {}) -> {} {:?} exc={} scope={}",
                    h.start, h.end, h.handler, h.kind, h.exception_local, h.scope_local
                );
            }
        }

        for unit in self.nested.iter() {
            out.push('\n');
            unit.disassemble_into(out);
        }
    }
}

impl fmt::Display for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.disassemble())
    }
}

/// Linear decoder over a unit's code. Stops at the first undecodable byte.
pub struct Instructions<'a> {
    unit: &'a CompiledUnit,
    pc: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        if self.pc >= self.unit.code.len() {
            return None;
        }
        let ins = self.unit.decode(self.pc)?;
        self.pc += ins.op.length();
        Some(ins)
    }
}
