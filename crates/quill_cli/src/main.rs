//! `quill`: run or disassemble a script given as a JSON syntax tree.
//!
//! Usage: `quill [--config FILE] [--max-depth N] [--instruction-budget N] <run|disasm> <ast.json>`

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use quill_ast::Program;
use quill_bytecode::CompiledUnit;
use quill_common::CompileError;
use quill_runtime::Value;
use quill_vm::{EngineConfig, ExecError, Vm};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Compile and run quill syntax trees")]
struct Cli {
    /// Engine settings as a JSON file; the flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Script call depth past which `InternalError: too much recursion` is thrown
    #[arg(long, global = true)]
    max_depth: Option<u32>,

    /// Instructions between interrupt checks; the script is stopped at the first check
    #[arg(long, global = true)]
    instruction_budget: Option<u64>,

    /// Language version; below 180 `==` compiles to strict equality
    #[arg(long, global = true)]
    language_version: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script and print its completion value
    Run { path: PathBuf },
    /// Print the icode of a script and every function in it
    Disasm { path: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("{}", .0.report())]
    Exec(#[from] ExecError),
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let outcome = engine_config(&cli).and_then(|config| match &cli.command {
        Command::Run { path } => run_script(path, config).map(|value| {
            if !value.is_undefined() {
                println!("{}", value);
            }
        }),
        Command::Disasm { path } => disassemble(path, &config).map(|text| print!("{}", text)),
    });

    if let Err(e) = outcome {
        eprintln!("{}", e);
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn engine_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => read_json(path)?,
        None => EngineConfig::default(),
    };
    if let Some(depth) = cli.max_depth {
        config.max_call_depth = depth;
    }
    if let Some(budget) = cli.instruction_budget {
        config.instruction_threshold = Some(budget);
    }
    if let Some(version) = cli.language_version {
        config.language_version = version;
    }
    debug!(?config, "engine configuration");
    Ok(config)
}

fn compile_file(path: &Path, config: &EngineConfig) -> Result<CompiledUnit, CliError> {
    let program: Program = read_json(path)?;
    let env = config.environment(&path.display().to_string());
    let unit = quill_bytecode::compile(&program, &env)?;
    info!(
        file = %path.display(),
        bytes = unit.code.len(),
        functions = unit.nested.len(),
        "compiled"
    );
    Ok(unit)
}

fn run_script(path: &Path, config: EngineConfig) -> Result<Value, CliError> {
    let unit = compile_file(path, &config)?;
    let mut vm = Vm::with_config(config);
    Ok(vm.execute(Rc::new(unit))?)
}

fn disassemble(path: &Path, config: &EngineConfig) -> Result<String, CliError> {
    Ok(compile_file(path, config)?.disassemble())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::build::*;
    use quill_ast::BinaryOp;
    use std::io::Write;

    fn json_file<T: serde::Serialize>(value: &T) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(value).unwrap().as_bytes())
            .unwrap();
        file
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("quill").chain(args.iter().copied()))
    }

    #[test]
    fn test_run_prints_completion_value() {
        let program = program(vec![expr_stmt(binary(BinaryOp::Mul, num(6.0), num(7.0)))]);
        let file = json_file(&program);
        let value = run_script(file.path(), EngineConfig::default()).unwrap();
        assert_eq!(value, Value::Number(42.0));
    }

    #[test]
    fn test_uncaught_error_reports_trace() {
        let program = program(vec![at_line(throw(string("boom")), 3)]);
        let file = json_file(&program);
        let err = run_script(file.path(), EngineConfig::default()).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("uncaught exception: boom\n\tat "), "{}", text);
        assert!(text.ends_with(":3"), "{}", text);
    }

    #[test]
    fn test_disasm_lists_instructions() {
        let program = program(vec![
            function_decl("f", &[], vec![ret(Some(num(1.0)))]),
            expr_stmt(call(ident("f"), vec![])),
        ]);
        let file = json_file(&program);
        let text = disassemble(file.path(), &EngineConfig::default()).unwrap();
        assert!(text.contains("CLOSURE_STMT"), "{}", text);
        assert!(text.contains("RETURN_RESULT"), "{}", text);
    }

    #[test]
    fn test_flags_override_config_file() {
        let file = json_file(&serde_json::json!({
            "max_call_depth": 10,
            "language_version": 120
        }));
        let path = file.path().to_str().unwrap();
        let parsed = cli(&["--config", path, "--max-depth", "99", "run", "x.json"]);
        let config = engine_config(&parsed).unwrap();
        assert_eq!(config.max_call_depth, 99);
        assert_eq!(config.language_version, 120);
        assert_eq!(config.instruction_threshold, None);
        assert!(matches!(parsed.command, Command::Run { .. }));
    }

    #[test]
    fn test_bad_input_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = run_script(file.path(), EngineConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Json { .. }));

        let missing = Path::new("/nonexistent/quill/script.json");
        let err = disassemble(missing, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
