use std::rc::Rc;

use crate::error::{ErrorType, NativeError};
use crate::object::ObjectKind;

use super::{array_index, Value};

// ---------------------------------------------------------------------------
// Equality
// ---------------------------------------------------------------------------

impl Value {
    /// Strict equality (`===`).
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // NaN !== NaN and +0 === -0 both fall out of f64 equality.
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose equality (`==`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::String(_)) => {
                self.strict_eq(&Value::Number(other.to_number()))
            }
            (Value::String(_), Value::Number(_)) => {
                Value::Number(self.to_number()).strict_eq(other)
            }
            (Value::Boolean(_), _) => Value::Number(self.to_number()).loose_eq(other),
            (_, Value::Boolean(_)) => self.loose_eq(&Value::Number(other.to_number())),
            (Value::String(_) | Value::Number(_), Value::Object(_)) => {
                self.loose_eq(&other.to_primitive())
            }
            (Value::Object(_), Value::String(_) | Value::Number(_)) => {
                self.to_primitive().loose_eq(other)
            }
            _ => self.strict_eq(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic -- the generic (coercing) paths
// ---------------------------------------------------------------------------

impl Value {
    /// The `+` operator: concatenation when either primitive side is a
    /// string, numeric addition otherwise.
    pub fn add(&self, other: &Value) -> Value {
        let lhs = self.to_primitive();
        let rhs = other.to_primitive();
        if lhs.is_string() || rhs.is_string() {
            let mut joined = lhs.to_string_value();
            joined.push_str(&rhs.to_js_string());
            return Value::String(Rc::from(joined.as_str()));
        }
        Value::Number(lhs.to_number() + rhs.to_number())
    }

    pub fn sub(&self, other: &Value) -> Value {
        Value::Number(self.to_number() - other.to_number())
    }

    pub fn mul(&self, other: &Value) -> Value {
        Value::Number(self.to_number() * other.to_number())
    }

    pub fn div(&self, other: &Value) -> Value {
        Value::Number(self.to_number() / other.to_number())
    }

    /// The `%` operator. `f64::rem` already has the truncating semantics
    /// scripts expect, including `x % 0 == NaN`.
    pub fn rem(&self, other: &Value) -> Value {
        Value::Number(self.to_number() % other.to_number())
    }

    pub fn neg(&self) -> Value {
        Value::Number(-self.to_number())
    }

    pub fn pos(&self) -> Value {
        Value::Number(self.to_number())
    }

    pub fn logical_not(&self) -> Value {
        Value::Boolean(!self.to_boolean())
    }
}

// ---------------------------------------------------------------------------
// Bitwise
// ---------------------------------------------------------------------------

impl Value {
    pub fn bitand(&self, other: &Value) -> Value {
        Value::Number((self.to_int32() & other.to_int32()) as f64)
    }

    pub fn bitor(&self, other: &Value) -> Value {
        Value::Number((self.to_int32() | other.to_int32()) as f64)
    }

    pub fn bitxor(&self, other: &Value) -> Value {
        Value::Number((self.to_int32() ^ other.to_int32()) as f64)
    }

    pub fn bitnot(&self) -> Value {
        Value::Number((!self.to_int32()) as f64)
    }

    pub fn shl(&self, other: &Value) -> Value {
        let rhs = other.to_uint32() & 0x1f;
        Value::Number(self.to_int32().wrapping_shl(rhs) as f64)
    }

    pub fn shr(&self, other: &Value) -> Value {
        let rhs = other.to_uint32() & 0x1f;
        Value::Number((self.to_int32() >> rhs) as f64)
    }

    pub fn ushr(&self, other: &Value) -> Value {
        let rhs = other.to_uint32() & 0x1f;
        Value::Number((self.to_uint32() >> rhs) as f64)
    }
}

// ---------------------------------------------------------------------------
// Relational comparison
// ---------------------------------------------------------------------------

impl Value {
    /// Abstract relational comparison `self < other`. `None` means a NaN
    /// was involved and every relational operator yields `false`.
    pub fn less_than(&self, other: &Value) -> Option<bool> {
        let lhs = self.to_primitive();
        let rhs = other.to_primitive();
        if let (Value::String(a), Value::String(b)) = (&lhs, &rhs) {
            return Some(a.as_ref() < b.as_ref());
        }
        let a = lhs.to_number();
        let b = rhs.to_number();
        if a.is_nan() || b.is_nan() {
            return None;
        }
        Some(a < b)
    }

    pub fn lt(&self, other: &Value) -> bool {
        self.less_than(other) == Some(true)
    }

    /// `a <= b` is `!(b < a)`, with NaN making it false.
    pub fn le(&self, other: &Value) -> bool {
        other.less_than(self) == Some(false)
    }

    pub fn gt(&self, other: &Value) -> bool {
        other.less_than(self) == Some(true)
    }

    pub fn ge(&self, other: &Value) -> bool {
        self.less_than(other) == Some(false)
    }
}

// ---------------------------------------------------------------------------
// Property access on arbitrary values
// ---------------------------------------------------------------------------

impl Value {
    /// `value[key]`. Reading from `null` or `undefined` is a `TypeError`.
    pub fn get_member(&self, key: &str) -> Result<Value, NativeError> {
        match self {
            Value::Object(obj) => Ok(obj.borrow().get(key).unwrap_or(Value::Undefined)),
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(array_index(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined))
            }
            Value::Undefined | Value::Null => Err(NativeError::typed(
                ErrorType::TypeError,
                format!("cannot read property '{}' of {}", key, self),
            )),
            Value::Boolean(_) | Value::Number(_) => Ok(Value::Undefined),
        }
    }

    /// `value[key] = v`. Writes to primitives are silently dropped.
    pub fn set_member(&self, key: &str, value: Value) -> Result<(), NativeError> {
        match self {
            Value::Object(obj) => {
                obj.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Undefined | Value::Null => Err(NativeError::typed(
                ErrorType::TypeError,
                format!("cannot set property '{}' of {}", key, self),
            )),
            _ => Ok(()),
        }
    }

    /// `delete value[key]`.
    pub fn delete_member(&self, key: &str) -> Result<bool, NativeError> {
        match self {
            Value::Object(obj) => Ok(obj.borrow_mut().delete(key)),
            Value::Undefined | Value::Null => Err(NativeError::typed(
                ErrorType::TypeError,
                format!("cannot delete property '{}' of {}", key, self),
            )),
            _ => Ok(true),
        }
    }

    /// The `in` operator: `key in self`.
    pub fn has_member(&self, key: &Value) -> Result<bool, NativeError> {
        match self {
            Value::Object(obj) => Ok(obj.borrow().has_property(&key.to_js_string())),
            _ => Err(NativeError::typed(
                ErrorType::TypeError,
                format!("cannot use 'in' to search for '{}' in {}", key, self),
            )),
        }
    }

    /// The `instanceof` operator: walks the prototype chain of `self`
    /// looking for `constructor.prototype`.
    pub fn instance_of(&self, constructor: &Value) -> Result<bool, NativeError> {
        let ctor = match constructor {
            Value::Object(ptr) if ptr.borrow().is_function() => ptr.clone(),
            _ => {
                return Err(NativeError::typed(
                    ErrorType::TypeError,
                    "right-hand side of 'instanceof' is not callable",
                ))
            }
        };
        let obj = match self {
            Value::Object(ptr) => ptr.clone(),
            _ => return Ok(false),
        };
        let proto = match ctor.borrow().get("prototype") {
            Some(Value::Object(p)) => p,
            _ => return Ok(false),
        };

        let mut current = obj.borrow().prototype.clone();
        while let Some(p) = current {
            if p.ptr_eq(&proto) {
                return Ok(true);
            }
            current = p.borrow().prototype.clone();
        }
        Ok(false)
    }

    /// Keys a `for-in` loop over this value visits.
    pub fn enumerable_keys(&self) -> Vec<Rc<str>> {
        match self {
            Value::Object(obj) => obj.borrow().enumerable_keys(),
            Value::String(s) => (0..s.chars().count())
                .map(|i| Rc::from(i.to_string().as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `true` for arrays.
    pub fn is_array(&self) -> bool {
        match self {
            Value::Object(obj) => matches!(obj.borrow().kind, ObjectKind::Array(_)),
            _ => false,
        }
    }
}
