use thiserror::Error;

use crate::source::SourceLocation;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Faults raised while lowering a syntax tree to icode.
///
/// The parser is expected to hand over well-formed trees, so every variant
/// here points either at an engine bug or at a tree built by hand with a
/// shape the compiler does not accept in that position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A jump label was referenced but never marked before finalization.
    #[error("unresolved jump label {label} in '{unit}'")]
    UnresolvedLabel { label: u32, unit: String },

    /// A label was marked at two different addresses.
    #[error("jump label {label} marked twice")]
    LabelRebound { label: u32 },

    /// `break label` / `continue label` names no enclosing labelled construct.
    #[error("undefined label '{label}' at {}:{}", location.line, location.column)]
    UndefinedLabel {
        label: String,
        location: SourceLocation,
    },

    /// `break` / `continue` outside any construct it could target.
    #[error("'{keyword}' outside of a loop or switch at {}:{}", location.line, location.column)]
    StrayJump {
        keyword: &'static str,
        location: SourceLocation,
    },

    /// The abstract stack depth did not balance.
    #[error("stack depth imbalance in '{unit}': expected {expected}, found {found}")]
    StackImbalance {
        unit: String,
        expected: i32,
        found: i32,
    },

    /// A node appeared where the compiler cannot lower it.
    #[error("malformed node: {message} at {}:{}", location.line, location.column)]
    MalformedNode {
        message: String,
        location: SourceLocation,
    },

    /// Two exception-table ranges overlap without nesting, or share an end.
    #[error("exception range [{start}, {end}) does not nest in '{unit}'")]
    HandlerNesting { start: u32, end: u32, unit: String },

    /// A constant table or frame size exceeded what the encoding can address.
    #[error("{table} table overflow")]
    TableOverflow { table: &'static str },
}

impl CompileError {
    pub fn malformed(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError::MalformedNode {
            message: message.into(),
            location,
        }
    }
}
