pub mod error;
pub mod source;
pub mod trace;

pub use error::{CompileError, Result};
pub use source::SourceLocation;
pub use trace::{format_trace, StackTraceElement};
