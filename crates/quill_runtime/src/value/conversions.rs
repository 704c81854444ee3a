use std::rc::Rc;

use crate::object::ObjectKind;

use super::{number_to_string, string_to_number, Value};

// ---------------------------------------------------------------------------
// Abstract conversions
// ---------------------------------------------------------------------------

impl Value {
    /// `ToBoolean`.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(_) => self.to_primitive().to_number(),
        }
    }

    /// `ToPrimitive`, simplified: objects convert through their string form.
    pub fn to_primitive(&self) -> Value {
        match self {
            Value::Object(_) => Value::String(self.to_js_string()),
            other => other.clone(),
        }
    }

    /// `ToString`, as an owned `String`.
    pub fn to_string_value(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(true) => "true".to_string(),
            Value::Boolean(false) => "false".to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(ptr) => {
                let obj = ptr.borrow();
                match &obj.kind {
                    ObjectKind::Array(elements) => elements
                        .iter()
                        .map(|v| {
                            if v.is_nullish() {
                                String::new()
                            } else {
                                v.to_string_value()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                    ObjectKind::Function(f) => {
                        format!("function {}() {{ [code] }}", f.name)
                    }
                    ObjectKind::Error(_) => {
                        let name = obj.get("name").unwrap_or(Value::string("Error"));
                        let message = obj.get("message").unwrap_or(Value::Undefined);
                        if message.is_undefined() || message.to_string_value().is_empty() {
                            name.to_string_value()
                        } else {
                            format!("{}: {}", name, message)
                        }
                    }
                    ObjectKind::Continuation(_) => "[object Continuation]".to_string(),
                    ObjectKind::Ordinary => "[object Object]".to_string(),
                }
            }
        }
    }

    /// `ToString`, as a shared string.
    pub fn to_js_string(&self) -> Rc<str> {
        match self {
            Value::String(s) => s.clone(),
            other => Rc::from(other.to_string_value().as_str()),
        }
    }

    /// The `typeof` result.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(obj) => {
                if obj.borrow().is_function() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// `ToInt32`, used by the bitwise operators.
    pub fn to_int32(&self) -> i32 {
        number_to_int32(self.to_number())
    }

    /// `ToUint32`, used by `>>>`.
    pub fn to_uint32(&self) -> u32 {
        self.to_int32() as u32
    }
}

/// `ToInt32` on a number that is already known.
pub fn number_to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulo = n.trunc().rem_euclid(4_294_967_296.0);
    if modulo >= 2_147_483_648.0 {
        (modulo - 4_294_967_296.0) as i32
    } else {
        modulo as i32
    }
}
