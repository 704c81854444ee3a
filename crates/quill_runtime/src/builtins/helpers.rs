use crate::gc::GcPtr;
use crate::object::{JsObject, NativeFn};
use crate::value::Value;

/// Attach a non-enumerable native function to an object.
pub fn set_native(obj: &mut JsObject, name: &str, func: NativeFn) {
    let fn_obj = JsObject::native_function(name, func);
    obj.define(name, Value::Object(GcPtr::new(fn_obj)));
}

/// The `i`th argument, `undefined` when absent.
pub fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}
