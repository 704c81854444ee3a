use crate::error::{ErrorType, NativeError};
use crate::gc::GcPtr;
use crate::object::{FunctionKind, Invoker, JsObject, ObjectRef};
use crate::value::Value;

use super::error::create_error_constructor;
use super::helpers::set_native;

/// Populate a global scope object with the built-in bindings.
pub fn install_globals(global: &ObjectRef) {
    let error_ctor = create_error_constructor(ErrorType::Error, None);
    let error_proto = match error_ctor.borrow().get("prototype") {
        Some(Value::Object(p)) => Some(p),
        _ => None,
    };

    let mut g = global.borrow_mut();
    g.define("undefined", Value::Undefined);
    g.define("NaN", Value::nan());
    g.define("Infinity", Value::infinity());
    set_native(&mut g, "print", global_print);

    let continuation = JsObject::function("Continuation", FunctionKind::ContinuationConstructor);
    g.define("Continuation", Value::Object(GcPtr::new(continuation)));

    g.define("Error", Value::Object(error_ctor));
    for kind in ErrorType::ALL.into_iter().skip(1) {
        let ctor = create_error_constructor(kind, error_proto.clone());
        g.define(kind.name(), Value::Object(ctor));
    }
}

/// `print(...args)`: space-separated, one line.
fn global_print(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let line = args
        .iter()
        .map(|v| v.to_string_value())
        .collect::<Vec<_>>()
        .join(" ");
    invoker.print(&line);
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::lookup;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
    }

    impl Invoker for Recorder {
        fn call(&mut self, _: &Value, _: &Value, _: &[Value]) -> Result<Value, NativeError> {
            Ok(Value::Undefined)
        }
        fn global(&self) -> ObjectRef {
            GcPtr::new(JsObject::scope(None))
        }
        fn print(&mut self, text: &str) {
            self.lines.push(text.to_string());
        }
    }

    #[test]
    fn globals_are_installed_and_hidden() {
        let global = GcPtr::new(JsObject::scope(None));
        install_globals(&global);
        for name in ["undefined", "NaN", "Infinity", "print", "Continuation", "InternalError"] {
            assert!(global.borrow().has_own_property(name), "{}", name);
        }
        assert!(global.borrow().enumerable_keys().is_empty());
        assert!(lookup(&global, "Continuation").is_some_and(|c| c.is_function()));
    }

    #[test]
    fn print_joins_arguments() {
        let mut rec = Recorder::default();
        global_print(
            &mut rec,
            &Value::Undefined,
            &[Value::string("a"), Value::Number(1.0), Value::Null],
        )
        .unwrap();
        assert_eq!(rec.lines, vec!["a 1 null"]);
    }
}
