pub mod buffer;
pub mod compiler;
pub mod opcode;
pub mod unit;

use std::fmt;
use std::rc::Rc;

pub use buffer::{CodeBuffer, Label, UnitHeader};
pub use compiler::Compiler;
pub use opcode::{Op, OperandFormat};
pub use unit::{
    CompiledUnit, ExceptionHandler, FunctionKind, HandlerKind, Instruction, LiteralId,
    RegExpLiteral, UnitFlags, DEFAULT_LANGUAGE_VERSION, STRICT_EQUALITY_VERSION,
};

/// Turns the text of a regexp literal into the form stored in a unit.
pub trait RegExpCompiler {
    fn compile(&self, pattern: &str, flags: &str) -> std::result::Result<RegExpLiteral, String>;
}

/// Accepts any pattern and checks only the flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralRegExpCompiler;

impl RegExpCompiler for LiteralRegExpCompiler {
    fn compile(&self, pattern: &str, flags: &str) -> std::result::Result<RegExpLiteral, String> {
        let mut seen = String::new();
        for flag in flags.chars() {
            if !"gim".contains(flag) {
                return Err(format!("invalid regular expression flag '{}'", flag));
            }
            if seen.contains(flag) {
                return Err(format!("duplicate regular expression flag '{}'", flag));
            }
            seen.push(flag);
        }
        Ok(RegExpLiteral {
            source: pattern.into(),
            flags: flags.into(),
        })
    }
}

/// Compilation settings shared by a unit and everything nested in it.
#[derive(Clone)]
pub struct Environment {
    pub language_version: u16,
    pub dynamic_scope: bool,
    /// Give every function an activation object, not only the ones with
    /// nested functions.
    pub require_activation: bool,
    pub source_name: Rc<str>,
    pub security_domain: Option<Rc<str>>,
    pub regexp_compiler: Rc<dyn RegExpCompiler>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            language_version: DEFAULT_LANGUAGE_VERSION,
            dynamic_scope: false,
            require_activation: false,
            source_name: "<script>".into(),
            security_domain: None,
            regexp_compiler: Rc::new(LiteralRegExpCompiler),
        }
    }
}

impl Environment {
    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.into();
        self
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("language_version", &self.language_version)
            .field("dynamic_scope", &self.dynamic_scope)
            .field("require_activation", &self.require_activation)
            .field("source_name", &self.source_name)
            .field("security_domain", &self.security_domain)
            .finish_non_exhaustive()
    }
}

/// Compile a script into a top-level unit.
pub fn compile(program: &quill_ast::Program, env: &Environment) -> quill_common::Result<CompiledUnit> {
    Compiler::compile_program(program, env)
}

/// Compile a standalone function. The result is the function's own unit,
/// ready to be closed over a scope.
pub fn compile_function(
    function: &quill_ast::FunctionDeclaration,
    env: &Environment,
) -> quill_common::Result<CompiledUnit> {
    Compiler::compile_standalone_function(function, env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_regexp_compiler_checks_flags() {
        let c = LiteralRegExpCompiler;
        let lit = c.compile("a+b", "gi").unwrap();
        assert_eq!(&*lit.source, "a+b");
        assert_eq!(&*lit.flags, "gi");
        assert!(c.compile("a", "x").is_err());
        assert!(c.compile("a", "gg").is_err());
    }

    #[test]
    fn environment_defaults() {
        let env = Environment::default().with_source_name("main.js");
        assert_eq!(env.language_version, DEFAULT_LANGUAGE_VERSION);
        assert_eq!(&*env.source_name, "main.js");
        assert!(format!("{:?}", env).contains("main.js"));
    }
}
