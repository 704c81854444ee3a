use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Script-visible error types the engine itself can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    InternalError,
}

impl ErrorType {
    pub const ALL: [ErrorType; 5] = [
        ErrorType::Error,
        ErrorType::TypeError,
        ErrorType::ReferenceError,
        ErrorType::RangeError,
        ErrorType::InternalError,
    ];

    /// Constructor name, also the `name` property of instances.
    pub fn name(self) -> &'static str {
        match self {
            ErrorType::Error => "Error",
            ErrorType::TypeError => "TypeError",
            ErrorType::ReferenceError => "ReferenceError",
            ErrorType::RangeError => "RangeError",
            ErrorType::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a native function or an object-model operation can fail.
///
/// The interpreter maps each variant onto its own fault class: `Throw` and
/// `Typed` are catchable, `Engine` only runs `finally` blocks, `Fatal`
/// tears the whole call down.
#[derive(Debug, Clone, Error)]
pub enum NativeError {
    /// A script value thrown as-is.
    #[error("{0}")]
    Throw(Value),

    /// An error object of the given type is to be created and thrown.
    #[error("{kind}: {message}")]
    Typed { kind: ErrorType, message: String },

    /// A host fault with no script-visible type.
    #[error("engine exception: {0}")]
    Engine(String),

    /// Unrecoverable; no script handler runs.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl NativeError {
    pub fn typed(kind: ErrorType, message: impl Into<String>) -> Self {
        NativeError::Typed {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        NativeError::typed(ErrorType::TypeError, message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        NativeError::typed(ErrorType::ReferenceError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_render_with_their_type() {
        let err = NativeError::type_error("x is not a function");
        assert_eq!(err.to_string(), "TypeError: x is not a function");
    }

    #[test]
    fn thrown_values_render_as_the_value() {
        let err = NativeError::Throw(Value::Number(3.0));
        assert_eq!(err.to_string(), "3");
    }

    #[test]
    fn names() {
        let names: Vec<&str> = ErrorType::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            ["Error", "TypeError", "ReferenceError", "RangeError", "InternalError"]
        );
    }
}
