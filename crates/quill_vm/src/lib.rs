//! The quill virtual machine.
//!
//! This crate contains:
//! - A trampoline **interpreter** for [`CompiledUnit`]s: script calls link
//!   heap frames instead of recursing on the native stack.
//! - **Continuations**: `new Continuation()` freezes the caller's frame
//!   chain, and calling the result resumes it with a value.
//! - The **fault** channel every unwinding event travels: thrown values,
//!   engine errors, host exceptions, native faults and continuation jumps.

pub mod arith;
pub mod config;
pub mod continuation;
pub mod fault;
pub mod frame;
pub mod hooks;
pub mod interpreter;

use std::io::Write;
use std::rc::Rc;

use quill_bytecode::CompiledUnit;
use quill_common::StackTraceElement;
use quill_runtime::builtins::{install_globals, make_error};
use quill_runtime::{GcPtr, Invoker, JsObject, NativeError, NativeFn, ObjectRef, Value};
use tracing::warn;

pub use config::{EngineConfig, DEFAULT_MAX_CALL_DEPTH};
pub use fault::{ExecError, Fault, NativeFault};
pub use frame::CallFrame;
pub use hooks::{DebugHook, InstructionObserver};

// ---------------------------------------------------------------------------
// VM
// ---------------------------------------------------------------------------

/// The execution context of one engine.
///
/// Owns the global object and everything that outlives a single call:
/// frame chains parked while a native function runs, the activation stack,
/// the instruction counter and the installed hooks.
pub struct Vm {
    pub(crate) config: EngineConfig,
    pub(crate) global: ObjectRef,

    /// Frame chains of invocations waiting on a native call, outermost first.
    pub(crate) suspended: Vec<Box<CallFrame>>,

    /// Activation objects of the frames entered, innermost last.
    pub(crate) activations: Vec<ObjectRef>,

    pub(crate) instruction_count: u64,
    pub(crate) debug_hook: Option<Box<dyn DebugHook>>,
    pub(crate) observer: Option<Box<dyn InstructionObserver>>,

    /// Where `print` writes.
    output: Box<dyn Write>,

    /// The fault that ended the last nested invocation, kept so the caller
    /// can rethrow it with its class and trace intact.
    pub(crate) escaped: Option<Fault>,
}

impl Vm {
    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Create a VM with default settings and the built-in globals installed.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let global = GcPtr::new(JsObject::scope(None));
        install_globals(&global);
        Vm {
            config,
            global,
            suspended: Vec::new(),
            activations: Vec::new(),
            instruction_count: 0,
            debug_hook: None,
            observer: None,
            output: Box::new(std::io::stdout()),
            escaped: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn globals(&self) -> ObjectRef {
        self.global.clone()
    }

    /// Redirect `print` output.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn set_debug_hook(&mut self, hook: Box<dyn DebugHook>) {
        self.debug_hook = Some(hook);
    }

    pub fn set_instruction_observer(&mut self, observer: Box<dyn InstructionObserver>) {
        self.observer = Some(observer);
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Run a top-level unit against the global object.
    pub fn execute(&mut self, unit: Rc<CompiledUnit>) -> Result<Value, ExecError> {
        let global = self.global.clone();
        self.execute_in(unit, Value::Object(global.clone()), &[], global)
    }

    /// Run `unit` with an explicit receiver, arguments and scope.
    pub fn execute_in(
        &mut self,
        unit: Rc<CompiledUnit>,
        this: Value,
        args: &[Value],
        scope: ObjectRef,
    ) -> Result<Value, ExecError> {
        if self.suspended.is_empty() {
            self.instruction_count = 0;
        }
        let depth = self.base_depth();
        if depth > self.config.max_call_depth {
            let error = NativeError::typed(
                quill_runtime::ErrorType::InternalError,
                "too much recursion",
            );
            return Err(self.native_fault(None, error).into_exec_error());
        }
        let this = self.bind_this(this);
        let mut frame = Box::new(CallFrame::new(unit, None, scope, this, depth));
        interpreter::enter_frame(self, &mut frame, args);
        interpreter::run(self, frame).map_err(Fault::into_exec_error)
    }

    /// Call a function value from the host.
    pub fn call_function(
        &mut self,
        function: &Value,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        if self.suspended.is_empty() {
            self.instruction_count = 0;
        }
        interpreter::call_value(self, function, this, args).map_err(Fault::into_exec_error)
    }

    // -----------------------------------------------------------------
    // Globals
    // -----------------------------------------------------------------

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.global.borrow().get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.global.borrow_mut().set(name, value);
    }

    /// Bind a native function as a global.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let native = JsObject::native_function(name, function);
        self.global
            .borrow_mut()
            .define(name, Value::Object(GcPtr::new(native)));
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Activation objects of the frames currently entered.
    pub fn activation_depth(&self) -> usize {
        self.activations.len()
    }

    /// Instructions run since the count was last reset. Only counted while
    /// an instruction threshold is configured.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    // -----------------------------------------------------------------
    // Internals shared with the interpreter
    // -----------------------------------------------------------------

    /// Depth of the outermost frame of a new invocation.
    pub(crate) fn base_depth(&self) -> u32 {
        self.suspended.last().map_or(0, |frame| frame.depth + 1)
    }

    /// A missing receiver becomes the global object.
    pub(crate) fn bind_this(&self, this: Value) -> Value {
        if this.is_nullish() {
            Value::Object(self.global.clone())
        } else {
            this
        }
    }

    /// Script frames from `frame` outwards, then those of every suspended
    /// invocation, innermost first.
    pub(crate) fn trace(&self, frame: Option<&CallFrame>) -> Vec<StackTraceElement> {
        let outer = self.suspended.iter().rev().flat_map(|parked| parked.chain());
        frame
            .into_iter()
            .flat_map(|frame| frame.chain())
            .chain(outer)
            .map(CallFrame::trace_element)
            .collect()
    }

    /// The fault a native error raises in `frame`.
    pub(crate) fn native_fault(&self, frame: Option<&CallFrame>, error: NativeError) -> Fault {
        let trace = self.trace(frame);
        match error {
            NativeError::Throw(value) => Fault::Throw { value, trace },
            NativeError::Typed { kind, message } => {
                let scope = frame.map_or(&self.global, |frame| &frame.scope);
                let value = make_error(scope, kind, &message);
                Fault::Error { value, trace }
            }
            NativeError::Engine(message) => Fault::Engine { message, trace },
            NativeError::Fatal(message) => {
                warn!(%message, "host fault");
                Fault::Native(NativeFault::Host(message))
            }
        }
    }

    /// Like [`Vm::native_fault`], but when the error is the one a nested
    /// invocation just reported, its original fault is raised instead.
    pub(crate) fn call_fault(&mut self, frame: Option<&CallFrame>, error: NativeError) -> Fault {
        if let Some(escaped) = self.escaped.take() {
            let same = match (&escaped, &error) {
                (
                    Fault::Throw { value, .. } | Fault::Error { value, .. },
                    NativeError::Throw(thrown),
                ) => value.strict_eq(thrown),
                (Fault::Engine { message, .. }, NativeError::Engine(reported)) => {
                    message == reported
                }
                (Fault::Native(fault), NativeError::Fatal(reported)) => {
                    fault.to_string() == *reported
                }
                _ => false,
            };
            if same {
                return escaped;
            }
        }
        self.native_fault(frame, error)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

impl Invoker for Vm {
    fn call(&mut self, function: &Value, this: &Value, args: &[Value]) -> Result<Value, NativeError> {
        interpreter::call_value(self, function, this, args).map_err(|fault| {
            let error = match &fault {
                Fault::Throw { value, .. } | Fault::Error { value, .. } => {
                    NativeError::Throw(value.clone())
                }
                Fault::Engine { message, .. } => NativeError::Engine(message.clone()),
                Fault::Native(native) => NativeError::Fatal(native.to_string()),
                Fault::Jump(_) => NativeError::Fatal("continuation jump left its invocation".into()),
            };
            self.escaped = Some(fault);
            error
        })
    }

    fn global(&self) -> ObjectRef {
        self.global.clone()
    }

    fn print(&mut self, text: &str) {
        if let Err(err) = writeln!(self.output, "{}", text) {
            warn!(error = %err, "failed to write script output");
        }
    }
}
