//! The icode instruction set.
//!
//! Every instruction is one opcode byte followed by an operand whose width
//! depends only on the opcode. Token opcodes live in `0x00..=0x7F`; icode
//! (interpreter-private) opcodes live in `0x80..=0xFF`, which reads as a
//! negative number when the byte is viewed as `i8`.
//!
//! Opcodes tagged "strReg" or "indexReg" consume the string or index
//! register loaded by the `REG_STR*` / `REG_IND*` instruction immediately
//! before them.
//!
//! ```
//! use quill_bytecode::opcode::{Op, OperandFormat};
//!
//! let goto = Op::from_byte(0x01).unwrap();
//! assert_eq!(goto, Op::Goto);
//! assert_eq!(goto.format(), OperandFormat::Jump);
//! assert_eq!(goto.length(), 3);
//! ```

/// Layout of the operand that follows an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    None,
    /// Unsigned byte: local slot, small var index, inc/dec flags.
    U8,
    /// Unsigned 16-bit index or argument count.
    U16,
    /// Unsigned 32-bit index.
    U32,
    /// Signed 16-bit offset from the operand address. Zero means "see the
    /// long-jump table".
    Jump,
    /// Signed 16-bit inline integer.
    I16,
    /// Signed 32-bit inline integer.
    I32,
    /// Unsigned 16-bit source line.
    Line,
}

impl OperandFormat {
    pub fn width(self) -> usize {
        match self {
            OperandFormat::None => 0,
            OperandFormat::U8 => 1,
            OperandFormat::U16 | OperandFormat::Jump | OperandFormat::I16 | OperandFormat::Line => 2,
            OperandFormat::U32 | OperandFormat::I32 => 4,
        }
    }
}

/// Flag bits carried by the `*_INC_DEC` operand byte.
pub const INCDEC_DECREMENT: u8 = 0x1;
pub const INCDEC_POSTFIX: u8 = 0x2;

/// Number of index / string register values with a zero-operand form.
pub const REG_INLINE_COUNT: u32 = 6;

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $variant:ident = $byte:literal, $mnemonic:literal, $format:ident, $effect:expr; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$doc])* $variant = $byte, )*
        }

        impl Op {
            /// Every defined opcode, in declaration order.
            pub const ALL: &'static [Op] = &[$( Op::$variant, )*];

            /// Decode an opcode byte. `None` means the byte names no opcode.
            pub fn from_byte(byte: u8) -> Option<Op> {
                match byte {
                    $( $byte => Some(Op::$variant), )*
                    _ => None,
                }
            }

            /// Mnemonic used by the disassembler.
            pub fn name(self) -> &'static str {
                match self {
                    $( Op::$variant => $mnemonic, )*
                }
            }

            pub fn format(self) -> OperandFormat {
                match self {
                    $( Op::$variant => OperandFormat::$format, )*
                }
            }

            /// Net change to the operand stack, or `None` when it depends on
            /// the operand (calls).
            pub fn stack_effect(self) -> Option<i32> {
                match self {
                    $( Op::$variant => $effect, )*
                }
            }
        }
    };
}

opcodes! {
    // ---- token opcodes ----
    /// Pop the return value and leave the frame.
    Return = 0x00, "RETURN", None, Some(-1);
    Goto = 0x01, "GOTO", Jump, Some(0);
    /// Pop; jump when falsy.
    IfEq = 0x02, "IFEQ", Jump, Some(-1);
    /// Pop; jump when truthy.
    IfNe = 0x03, "IFNE", Jump, Some(-1);
    Throw = 0x04, "THROW", None, Some(-1);
    BitOr = 0x05, "BITOR", None, Some(-1);
    BitXor = 0x06, "BITXOR", None, Some(-1);
    BitAnd = 0x07, "BITAND", None, Some(-1);
    Eq = 0x08, "EQ", None, Some(-1);
    Ne = 0x09, "NE", None, Some(-1);
    Lt = 0x0A, "LT", None, Some(-1);
    Le = 0x0B, "LE", None, Some(-1);
    Gt = 0x0C, "GT", None, Some(-1);
    Ge = 0x0D, "GE", None, Some(-1);
    Lsh = 0x0E, "LSH", None, Some(-1);
    Rsh = 0x0F, "RSH", None, Some(-1);
    Ursh = 0x10, "URSH", None, Some(-1);
    Add = 0x11, "ADD", None, Some(-1);
    Sub = 0x12, "SUB", None, Some(-1);
    Mul = 0x13, "MUL", None, Some(-1);
    Div = 0x14, "DIV", None, Some(-1);
    Mod = 0x15, "MOD", None, Some(-1);
    Not = 0x16, "NOT", None, Some(0);
    BitNot = 0x17, "BITNOT", None, Some(0);
    Pos = 0x18, "POS", None, Some(0);
    Neg = 0x19, "NEG", None, Some(0);
    /// Construct with N arguments: `callee, args... -> instance`.
    New = 0x1A, "NEW", U16, None;
    /// `object, key -> boolean`
    DelProp = 0x1B, "DELPROP", None, Some(-1);
    TypeOf = 0x1C, "TYPEOF", None, Some(0);
    /// strReg. `object -> value`
    GetProp = 0x1D, "GETPROP", None, Some(0);
    /// strReg. `object, value -> value`
    SetProp = 0x1E, "SETPROP", None, Some(-1);
    /// `object, key -> value`
    GetElem = 0x1F, "GETELEM", None, Some(-1);
    /// `object, key, value -> value`
    SetElem = 0x20, "SETELEM", None, Some(-2);
    /// Call with N arguments: `callee, this, args... -> result`.
    Call = 0x21, "CALL", U16, None;
    /// strReg. Resolve a free name through the scope chain.
    Name = 0x22, "NAME", None, Some(1);
    /// indexReg. Push an entry of the double table.
    Number = 0x23, "NUMBER", None, Some(1);
    /// strReg.
    String = 0x24, "STRING", None, Some(1);
    Null = 0x25, "NULL", None, Some(1);
    This = 0x26, "THIS", None, Some(1);
    False = 0x27, "FALSE", None, Some(1);
    True = 0x28, "TRUE", None, Some(1);
    ShEq = 0x29, "SHEQ", None, Some(-1);
    ShNe = 0x2A, "SHNE", None, Some(-1);
    /// indexReg. Materialize a regexp literal.
    RegExp = 0x2B, "REGEXP", None, Some(1);
    /// strReg. `value -> value`, binding the name in the scope that holds it.
    SetName = 0x2C, "SETNAME", None, Some(0);
    /// indexReg.
    GetVar = 0x2D, "GETVAR", None, Some(1);
    /// indexReg. `value -> value`
    SetVar = 0x2E, "SETVAR", None, Some(0);
    In = 0x2F, "IN", None, Some(-1);
    InstanceOf = 0x30, "INSTANCEOF", None, Some(-1);
    /// Pop an object and store a key enumerator in the given local.
    EnumInit = 0x31, "ENUM_INIT", U8, Some(-1);
    /// Advance the enumerator in the given local; push whether a key remains.
    EnumNext = 0x32, "ENUM_NEXT", U8, Some(1);
    /// Push the enumerator's current key.
    EnumId = 0x33, "ENUM_ID", U8, Some(1);
    /// `buffer -> array`
    ArrayLit = 0x34, "ARRAYLIT", None, Some(0);
    /// indexReg (property-name literal id). `buffer -> object`
    ObjectLit = 0x35, "OBJECTLIT", None, Some(0);
    /// strReg. `typeof name` without a reference error.
    TypeOfName = 0x36, "TYPEOFNAME", None, Some(1);
    /// Leave the frame returning the result register.
    ReturnResult = 0x37, "RETURN_RESULT", None, Some(0);

    // ---- icode ----
    Dup = 0xFF, "DUP", None, Some(1);
    Dup2 = 0xFE, "DUP2", None, Some(2);
    Swap = 0xFD, "SWAP", None, Some(0);
    Pop = 0xFC, "POP", None, Some(-1);
    /// Pop into the frame's result register.
    PopResult = 0xFB, "POP_RESULT", None, Some(-1);
    /// Pop a condition; when truthy also pop the switch selector and jump.
    IfEqPop = 0xFA, "IFEQ_POP", Jump, Some(-1);
    /// indexReg.
    VarIncDec = 0xF9, "VAR_INC_DEC", U8, Some(1);
    /// strReg.
    NameIncDec = 0xF8, "NAME_INC_DEC", U8, Some(1);
    /// strReg. `object -> value`
    PropIncDec = 0xF7, "PROP_INC_DEC", U8, Some(0);
    /// `object, key -> value`
    ElemIncDec = 0xF6, "ELEM_INC_DEC", U8, Some(-1);
    /// `value -> value`; always a reference error.
    RefIncDec = 0xF5, "REF_INC_DEC", U8, Some(0);
    /// strReg. `-> callee, this`
    NameAndThis = 0xF4, "NAME_AND_THIS", None, Some(2);
    /// strReg. `object -> callee, this`
    PropAndThis = 0xF3, "PROP_AND_THIS", None, Some(1);
    /// `object, key -> callee, this`
    ElemAndThis = 0xF2, "ELEM_AND_THIS", None, Some(0);
    /// `value -> callee, undefined`
    ValueAndThis = 0xF1, "VALUE_AND_THIS", None, Some(1);
    /// indexReg (nested unit). Push a closure over the current scope.
    ClosureExpr = 0xF0, "CLOSURE_EXPR", None, Some(1);
    /// indexReg (nested unit). Bind a closure under its name in the current scope.
    ClosureStmt = 0xEF, "CLOSURE_STMT", None, Some(0);
    /// Call that replaces the current frame when the callee is interpreted.
    TailCall = 0xEE, "TAIL_CALL", U16, None;
    ReturnUndef = 0xED, "RETUNDEF", None, Some(0);
    /// Finish a finally block: jump back or rethrow, per the given local.
    RetSub = 0xEC, "RETSUB", U8, Some(0);
    /// indexReg (local). Store the return address and enter a finally block.
    Gosub = 0xEB, "GOSUB", Jump, Some(0);
    LocalLoad = 0xEA, "LOCAL_LOAD", U8, Some(1);
    LocalClear = 0xE9, "LOCAL_CLEAR", U8, Some(0);
    ScopeSave = 0xE8, "SCOPE_SAVE", U8, Some(0);
    ScopeLoad = 0xE7, "SCOPE_LOAD", U8, Some(0);
    /// strReg. Pop the caught value and enter a scope binding it.
    CatchScope = 0xE6, "CATCH_SCOPE", None, Some(-1);
    /// indexReg (element count). Push an empty literal buffer.
    LiteralNew = 0xE5, "LITERAL_NEW", None, Some(1);
    /// `buffer, value -> buffer`
    LiteralSet = 0xE4, "LITERAL_SET", None, Some(-1);
    /// indexReg (skip-index literal id). `buffer -> array`
    SparseArrayLit = 0xE3, "SPARSE_ARRAYLIT", None, Some(0);
    Undef = 0xE2, "UNDEF", None, Some(1);
    Zero = 0xE1, "ZERO", None, Some(1);
    One = 0xE0, "ONE", None, Some(1);
    ShortNumber = 0xDF, "SHORTNUMBER", I16, Some(1);
    IntNumber = 0xDE, "INTNUMBER", I32, Some(1);
    Line = 0xDD, "LINE", Line, Some(0);
    GetVar1 = 0xDC, "GETVAR1", U8, Some(1);
    SetVar1 = 0xDB, "SETVAR1", U8, Some(0);
    RegIndC0 = 0xDA, "REG_IND_C0", None, Some(0);
    RegIndC1 = 0xD9, "REG_IND_C1", None, Some(0);
    RegIndC2 = 0xD8, "REG_IND_C2", None, Some(0);
    RegIndC3 = 0xD7, "REG_IND_C3", None, Some(0);
    RegIndC4 = 0xD6, "REG_IND_C4", None, Some(0);
    RegIndC5 = 0xD5, "REG_IND_C5", None, Some(0);
    RegInd1 = 0xD4, "REG_IND1", U8, Some(0);
    RegInd2 = 0xD3, "REG_IND2", U16, Some(0);
    RegInd4 = 0xD2, "REG_IND4", U32, Some(0);
    RegStrC0 = 0xD1, "REG_STR_C0", None, Some(0);
    RegStrC1 = 0xD0, "REG_STR_C1", None, Some(0);
    RegStrC2 = 0xCF, "REG_STR_C2", None, Some(0);
    RegStrC3 = 0xCE, "REG_STR_C3", None, Some(0);
    RegStrC4 = 0xCD, "REG_STR_C4", None, Some(0);
    RegStrC5 = 0xCC, "REG_STR_C5", None, Some(0);
    RegStr1 = 0xCB, "REG_STR1", U8, Some(0);
    RegStr2 = 0xCA, "REG_STR2", U16, Some(0);
    RegStr4 = 0xC9, "REG_STR4", U32, Some(0);
}

impl Op {
    /// Encoded length of the instruction, opcode byte included.
    pub fn length(self) -> usize {
        1 + self.format().width()
    }

    /// `true` for interpreter-private opcodes.
    pub fn is_icode(self) -> bool {
        (self as u8 as i8) < 0
    }

    pub fn is_jump(self) -> bool {
        self.format() == OperandFormat::Jump
    }

    /// Zero-operand index-register load for `index`, if one exists.
    pub fn inline_index_reg(index: u32) -> Option<Op> {
        const FORMS: [Op; 6] = [
            Op::RegIndC0,
            Op::RegIndC1,
            Op::RegIndC2,
            Op::RegIndC3,
            Op::RegIndC4,
            Op::RegIndC5,
        ];
        FORMS.get(index as usize).copied()
    }

    /// Zero-operand string-register load for `index`, if one exists.
    pub fn inline_string_reg(index: u32) -> Option<Op> {
        const FORMS: [Op; 6] = [
            Op::RegStrC0,
            Op::RegStrC1,
            Op::RegStrC2,
            Op::RegStrC3,
            Op::RegStrC4,
            Op::RegStrC5,
        ];
        FORMS.get(index as usize).copied()
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_decodes_to_itself() {
        for &op in Op::ALL {
            assert_eq!(Op::from_byte(op as u8), Some(op), "{}", op.name());
        }
    }

    #[test]
    fn token_and_icode_ranges_are_disjoint() {
        for &op in Op::ALL {
            if op.is_icode() {
                assert!(op as u8 >= 0x80, "{} should be icode", op.name());
            } else {
                assert!(op as u8 <= 0x7F, "{} should be a token", op.name());
            }
        }
        assert!(Op::Dup.is_icode());
        assert!(!Op::Add.is_icode());
    }

    #[test]
    fn unassigned_bytes_are_rejected() {
        assert_eq!(Op::from_byte(0x7F), None);
        assert_eq!(Op::from_byte(0x80), None);
        let defined = (0..=255u8).filter(|b| Op::from_byte(*b).is_some()).count();
        assert_eq!(defined, Op::ALL.len());
    }

    #[test]
    fn lengths_follow_operand_format() {
        assert_eq!(Op::Add.length(), 1);
        assert_eq!(Op::EnumInit.length(), 2);
        assert_eq!(Op::Goto.length(), 3);
        assert_eq!(Op::Call.length(), 3);
        assert_eq!(Op::ShortNumber.length(), 3);
        assert_eq!(Op::IntNumber.length(), 5);
        assert_eq!(Op::RegInd4.length(), 5);
        assert_eq!(Op::Line.length(), 3);
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Op::IfEqPop.name(), "IFEQ_POP");
        assert_eq!(format!("{}", Op::ReturnResult), "RETURN_RESULT");
    }

    #[test]
    fn inline_register_forms_cover_zero_to_five() {
        assert_eq!(Op::inline_index_reg(0), Some(Op::RegIndC0));
        assert_eq!(Op::inline_index_reg(5), Some(Op::RegIndC5));
        assert_eq!(Op::inline_index_reg(6), None);
        assert_eq!(Op::inline_string_reg(3), Some(Op::RegStrC3));
        assert_eq!(Op::inline_string_reg(6), None);
    }

    #[test]
    fn calls_have_variable_stack_effect() {
        assert_eq!(Op::Call.stack_effect(), None);
        assert_eq!(Op::New.stack_effect(), None);
        assert_eq!(Op::TailCall.stack_effect(), None);
        assert_eq!(Op::Dup2.stack_effect(), Some(2));
    }
}
