use std::fmt;

/// One line of a script-level stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    pub file_name: String,
    /// Empty for top-level script code.
    pub function_name: String,
    pub line: u32,
}

impl fmt::Display for StackTraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function_name.is_empty() {
            write!(f, "\tat {}:{}", self.file_name, self.line)
        } else {
            write!(
                f,
                "\tat {}:{} ({})",
                self.file_name, self.line, self.function_name
            )
        }
    }
}

/// Render a trace innermost-first, one element per line.
pub fn format_trace(trace: &[StackTraceElement]) -> String {
    trace
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_frame_has_no_function_suffix() {
        let e = StackTraceElement {
            file_name: "main.js".into(),
            function_name: String::new(),
            line: 4,
        };
        assert_eq!(e.to_string(), "\tat main.js:4");
    }

    #[test]
    fn format_trace_joins_lines() {
        let trace = vec![
            StackTraceElement {
                file_name: "a.js".into(),
                function_name: "inner".into(),
                line: 2,
            },
            StackTraceElement {
                file_name: "a.js".into(),
                function_name: String::new(),
                line: 9,
            },
        ];
        assert_eq!(format_trace(&trace), "\tat a.js:2 (inner)\n\tat a.js:9");
    }
}
