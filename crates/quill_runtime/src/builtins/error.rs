use crate::error::{ErrorType, NativeError};
use crate::gc::GcPtr;
use crate::object::{lookup, Invoker, JsObject, NativeFn, ObjectRef};
use crate::value::Value;

use super::helpers::arg;

/// Build the constructor for `kind`, with a `prototype` object whose
/// prototype is `parent` (`Error.prototype` for the subtypes).
pub fn create_error_constructor(kind: ErrorType, parent: Option<ObjectRef>) -> ObjectRef {
    let native_fn: NativeFn = match kind {
        ErrorType::Error => error_ctor_generic,
        ErrorType::TypeError => error_ctor_type,
        ErrorType::ReferenceError => error_ctor_reference,
        ErrorType::RangeError => error_ctor_range,
        ErrorType::InternalError => error_ctor_internal,
    };

    let mut proto = JsObject::with_prototype(parent);
    proto.define("name", Value::string(kind.name()));
    proto.define("message", Value::string(""));

    let mut ctor = JsObject::native_function(kind.name(), native_fn);
    ctor.define("prototype", Value::Object(GcPtr::new(proto)));
    GcPtr::new(ctor)
}

/// A fresh error instance of `kind`, linked to the constructor found in
/// `scope` when there is one.
pub fn make_error(scope: &ObjectRef, kind: ErrorType, message: &str) -> Value {
    let proto = match lookup(scope, kind.name()) {
        Some(Value::Object(ctor)) => match ctor.borrow().get("prototype") {
            Some(Value::Object(p)) => Some(p),
            _ => None,
        },
        _ => None,
    };
    Value::Object(GcPtr::new(JsObject::error(kind, message, proto)))
}

fn construct(
    invoker: &mut dyn Invoker,
    kind: ErrorType,
    args: &[Value],
) -> Result<Value, NativeError> {
    let message = match arg(args, 0) {
        Value::Undefined => String::new(),
        v => v.to_string_value(),
    };
    Ok(make_error(&invoker.global(), kind, &message))
}

fn error_ctor_generic(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    construct(invoker, ErrorType::Error, args)
}

fn error_ctor_type(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    construct(invoker, ErrorType::TypeError, args)
}

fn error_ctor_reference(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    construct(invoker, ErrorType::ReferenceError, args)
}

fn error_ctor_range(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    construct(invoker, ErrorType::RangeError, args)
}

fn error_ctor_internal(
    invoker: &mut dyn Invoker,
    _this: &Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    construct(invoker, ErrorType::InternalError, args)
}
