use std::fmt;
use std::rc::Rc;

use quill_common::{format_trace, StackTraceElement};
use quill_runtime::Value;
use thiserror::Error;

use crate::frame::CallFrame;

// ---------------------------------------------------------------------------
// Native faults
// ---------------------------------------------------------------------------

/// Faults no script handler may observe. They tear the call chain down
/// without running `catch` or `finally` blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeFault {
    /// The instruction budget ran out and the observer did not extend it.
    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("bad opcode 0x{byte:02x} at pc {pc} in '{unit}'")]
    BadOpcode { byte: u8, pc: usize, unit: String },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    /// A native function reported an unrecoverable failure.
    #[error("host fault: {0}")]
    Host(String),
}

// ---------------------------------------------------------------------------
// Continuation jumps
// ---------------------------------------------------------------------------

/// A resume in flight: unwinding toward `branch`, then re-entering the
/// captured chain at `target`.
#[derive(Clone)]
pub struct ContinuationJump {
    /// The frame that issued the capture call. `None` for a continuation
    /// that captured nothing.
    pub target: Option<Rc<CallFrame>>,
    /// Deepest frame shared by the captured chain and the live chain at
    /// resume time. `None` when the continuation is detached.
    pub branch: Option<Rc<CallFrame>>,
    pub result: Value,
}

impl ContinuationJump {
    /// Address of the branch frame, for identity checks against the live chain.
    pub fn branch_ptr(&self) -> Option<*const CallFrame> {
        self.branch.as_ref().map(Rc::as_ptr)
    }
}

impl fmt::Debug for ContinuationJump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationJump")
            .field("target", &self.target.as_ref().map(|t| t.unit.display_name().to_string()))
            .field("detached", &self.branch.is_none())
            .field("result", &self.result)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Faults in flight
// ---------------------------------------------------------------------------

/// Everything that travels the unwind channel.
#[derive(Debug, Clone)]
pub enum Fault {
    /// A value thrown by script code.
    Throw {
        value: Value,
        trace: Vec<StackTraceElement>,
    },
    /// A typed error object raised by the engine.
    Error {
        value: Value,
        trace: Vec<StackTraceElement>,
    },
    /// A host exception with no script-visible type; only `finally` runs.
    Engine {
        message: String,
        trace: Vec<StackTraceElement>,
    },
    Native(NativeFault),
    Jump(ContinuationJump),
}

impl Fault {
    /// `catch` records may take this fault.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Fault::Throw { .. } | Fault::Error { .. })
    }

    /// Handler tables are consulted at all.
    pub fn searches_handlers(&self) -> bool {
        !matches!(self, Fault::Native(_))
    }

    /// The value a `catch` block binds.
    pub fn caught_value(&self) -> Option<&Value> {
        match self {
            Fault::Throw { value, .. } | Fault::Error { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Fault::Throw { .. } => "throw",
            Fault::Error { .. } => "runtime error",
            Fault::Engine { .. } => "engine exception",
            Fault::Native(_) => "native fault",
            Fault::Jump(_) => "continuation jump",
        }
    }

    /// The error a fault that left its outermost frame becomes.
    pub(crate) fn into_exec_error(self) -> ExecError {
        match self {
            Fault::Throw { value, trace } | Fault::Error { value, trace } => {
                ExecError::Uncaught { value, trace }
            }
            Fault::Engine { message, trace } => ExecError::Engine { message, trace },
            Fault::Native(fault) => ExecError::Fatal(fault),
            Fault::Jump(_) => ExecError::Fatal(NativeFault::Invariant(
                "continuation jump escaped its invocation".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Host-facing errors
// ---------------------------------------------------------------------------

/// Why an invocation did not return a value.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("uncaught exception: {value}")]
    Uncaught {
        value: Value,
        trace: Vec<StackTraceElement>,
    },

    #[error("engine exception: {message}")]
    Engine {
        message: String,
        trace: Vec<StackTraceElement>,
    },

    #[error(transparent)]
    Fatal(#[from] NativeFault),
}

impl ExecError {
    /// Script frames live when the fault was raised, innermost first.
    /// Empty for fatal faults.
    pub fn trace(&self) -> &[StackTraceElement] {
        match self {
            ExecError::Uncaught { trace, .. } | ExecError::Engine { trace, .. } => trace,
            ExecError::Fatal(_) => &[],
        }
    }

    /// The message followed by the trace, one frame per line.
    pub fn report(&self) -> String {
        let trace = self.trace();
        if trace.is_empty() {
            self.to_string()
        } else {
            format!("{}\n{}", self, format_trace(trace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(function: &str, line: u32) -> StackTraceElement {
        StackTraceElement {
            file_name: "t.js".into(),
            function_name: function.into(),
            line,
        }
    }

    #[test]
    fn fault_classes() {
        let thrown = Fault::Throw {
            value: Value::Number(1.0),
            trace: vec![],
        };
        let engine = Fault::Engine {
            message: "host".into(),
            trace: vec![],
        };
        let native = Fault::Native(NativeFault::Interrupted("budget".into()));
        assert!(thrown.is_catchable() && thrown.searches_handlers());
        assert!(!engine.is_catchable() && engine.searches_handlers());
        assert!(!native.is_catchable() && !native.searches_handlers());
        assert_eq!(thrown.caught_value(), Some(&Value::Number(1.0)));
        assert!(engine.caught_value().is_none());
    }

    #[test]
    fn report_appends_trace() {
        let err = Fault::Throw {
            value: Value::string("boom"),
            trace: vec![element("inner", 2), element("", 7)],
        }
        .into_exec_error();
        assert_eq!(
            err.report(),
            "uncaught exception: boom\n\tat t.js:2 (inner)\n\tat t.js:7"
        );
    }

    #[test]
    fn fatal_has_no_trace() {
        let err: ExecError = NativeFault::BadOpcode {
            byte: 0x7f,
            pc: 3,
            unit: "f".into(),
        }
        .into();
        assert!(err.trace().is_empty());
        assert_eq!(err.to_string(), "bad opcode 0x7f at pc 3 in 'f'");
    }
}
