//! Values and the minimal object model the quill interpreter runs against.

pub mod builtins;
pub mod error;
pub mod gc;
pub mod object;
pub mod value;

pub use error::{ErrorType, NativeError};
pub use gc::GcPtr;
pub use object::{
    ContinuationData, FunctionKind, FunctionObject, Invoker, JsObject, KeyEnumerator, NativeFn,
    ObjectKind, ObjectRef, Property,
};
pub use value::{array_index, number_to_int32, number_to_string, Value};
