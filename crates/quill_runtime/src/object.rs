use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use quill_bytecode::CompiledUnit;

use crate::error::{ErrorType, NativeError};
use crate::gc::GcPtr;
use crate::value::{array_index, Value};

/// Shared handle to a heap object.
pub type ObjectRef = GcPtr<JsObject>;

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// A data property.
#[derive(Debug, Clone)]
pub struct Property {
    pub value: Value,
    pub enumerable: bool,
}

impl Property {
    /// An enumerable data property.
    pub fn data(value: Value) -> Self {
        Property {
            value,
            enumerable: true,
        }
    }

    /// A property `for-in` does not visit (built-ins, `prototype`).
    pub fn hidden(value: Value) -> Self {
        Property {
            value,
            enumerable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Key enumerator
// ---------------------------------------------------------------------------

/// State of one `for-in` loop. The key list is fixed when the loop starts.
#[derive(Debug, Clone, Default)]
pub struct KeyEnumerator {
    keys: Vec<Rc<str>>,
    next: usize,
    current: Option<Rc<str>>,
}

impl KeyEnumerator {
    pub fn new(keys: Vec<Rc<str>>) -> Self {
        KeyEnumerator {
            keys,
            next: 0,
            current: None,
        }
    }

    /// Step to the next key. Returns `false` once the keys are exhausted.
    pub fn advance(&mut self) -> bool {
        self.current = self.keys.get(self.next).cloned();
        self.next += 1;
        self.current.is_some()
    }

    /// The key the last `advance` stepped to.
    pub fn current(&self) -> Value {
        match &self.current {
            Some(key) => Value::String(key.clone()),
            None => Value::Undefined,
        }
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// What a native function may ask of the engine that called it.
pub trait Invoker {
    /// Call `function` re-entering the interpreter when it is scripted.
    fn call(&mut self, function: &Value, this: &Value, args: &[Value]) -> Result<Value, NativeError>;

    /// The global scope object.
    fn global(&self) -> ObjectRef;

    /// Write one line of script output.
    fn print(&mut self, text: &str);
}

/// Signature for native functions: the invoking engine, `this`, arguments.
pub type NativeFn = fn(&mut dyn Invoker, &Value, &[Value]) -> Result<Value, NativeError>;

#[derive(Clone)]
pub enum FunctionKind {
    /// A closure over `scope` running `unit`.
    Interpreted {
        unit: Rc<CompiledUnit>,
        scope: ObjectRef,
    },
    Native(NativeFn),
    /// The `Continuation` constructor: `new Continuation()` captures the
    /// caller's frame chain.
    ContinuationConstructor,
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Interpreted { unit, .. } => {
                write!(f, "Interpreted({})", unit.display_name())
            }
            FunctionKind::Native(_) => write!(f, "Native(<fn>)"),
            FunctionKind::ContinuationConstructor => write!(f, "ContinuationConstructor"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionObject {
    pub name: Rc<str>,
    pub kind: FunctionKind,
}

/// The captured frame chain of a continuation, owned by the interpreter.
///
/// The runtime never looks inside; the interpreter downcasts it back to its
/// frame type. `None` means nothing was captured and calling the
/// continuation simply returns its argument.
#[derive(Clone, Default)]
pub struct ContinuationData {
    pub frame: Option<Rc<dyn Any>>,
}

impl fmt::Debug for ContinuationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.frame.is_some() { "captured" } else { "empty" };
        write!(f, "Continuation({})", state)
    }
}

// ---------------------------------------------------------------------------
// JsObject
// ---------------------------------------------------------------------------

/// Internal behaviour of an object.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(FunctionObject),
    Error(ErrorType),
    Continuation(ContinuationData),
}

/// A bag of named properties with a prototype link.
///
/// Objects double as scopes: a scope is an object whose properties are the
/// bindings and whose `parent_scope` is the enclosing scope.
#[derive(Clone)]
pub struct JsObject {
    pub properties: IndexMap<Rc<str>, Property>,
    pub prototype: Option<ObjectRef>,
    pub parent_scope: Option<ObjectRef>,
    pub kind: ObjectKind,
}

impl JsObject {
    // ----------------------------------------------------------------
    //  Constructors
    // ----------------------------------------------------------------

    pub fn ordinary() -> Self {
        JsObject {
            properties: IndexMap::new(),
            prototype: None,
            parent_scope: None,
            kind: ObjectKind::Ordinary,
        }
    }

    pub fn with_prototype(proto: Option<ObjectRef>) -> Self {
        JsObject {
            prototype: proto,
            ..JsObject::ordinary()
        }
    }

    /// A fresh scope nested in `parent`.
    pub fn scope(parent: Option<ObjectRef>) -> Self {
        JsObject {
            parent_scope: parent,
            ..JsObject::ordinary()
        }
    }

    pub fn array(elements: Vec<Value>) -> Self {
        JsObject {
            kind: ObjectKind::Array(elements),
            ..JsObject::ordinary()
        }
    }

    pub fn function(name: impl Into<Rc<str>>, kind: FunctionKind) -> Self {
        JsObject {
            kind: ObjectKind::Function(FunctionObject {
                name: name.into(),
                kind,
            }),
            ..JsObject::ordinary()
        }
    }

    pub fn native_function(name: &str, call: NativeFn) -> Self {
        JsObject::function(name, FunctionKind::Native(call))
    }

    /// An error instance carrying `name` and `message`.
    pub fn error(kind: ErrorType, message: &str, prototype: Option<ObjectRef>) -> Self {
        let mut obj = JsObject {
            prototype,
            kind: ObjectKind::Error(kind),
            ..JsObject::ordinary()
        };
        obj.define("name", Value::string(kind.name()));
        obj.define("message", Value::string(message));
        obj
    }

    pub fn continuation(data: ContinuationData) -> Self {
        JsObject {
            kind: ObjectKind::Continuation(data),
            ..JsObject::ordinary()
        }
    }

    // ----------------------------------------------------------------
    //  Kind queries
    // ----------------------------------------------------------------

    /// Anything a call instruction can target.
    pub fn is_function(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function(_) | ObjectKind::Continuation(_)
        )
    }

    pub fn as_function(&self) -> Option<&FunctionObject> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    // ----------------------------------------------------------------
    //  Property access
    // ----------------------------------------------------------------

    /// Own property only.
    pub fn get_own(&self, key: &str) -> Option<Value> {
        if let ObjectKind::Array(elements) = &self.kind {
            if key == "length" {
                return Some(Value::Number(elements.len() as f64));
            }
            if let Some(idx) = array_index(key) {
                return elements.get(idx).cloned();
            }
        }
        self.properties.get(key).map(|p| p.value.clone())
    }

    /// Own property, then the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value);
        }
        let mut current = self.prototype.clone();
        while let Some(proto) = current {
            let obj = proto.borrow();
            if let Some(value) = obj.get_own(key) {
                return Some(value);
            }
            current = obj.prototype.clone();
        }
        None
    }

    pub fn has_own_property(&self, key: &str) -> bool {
        if let ObjectKind::Array(elements) = &self.kind {
            if key == "length" {
                return true;
            }
            if let Some(idx) = array_index(key) {
                return idx < elements.len();
            }
        }
        self.properties.contains_key(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        if self.has_own_property(key) {
            return true;
        }
        let mut current = self.prototype.clone();
        while let Some(proto) = current {
            let obj = proto.borrow();
            if obj.has_own_property(key) {
                return true;
            }
            current = obj.prototype.clone();
        }
        false
    }

    /// Assign `key`, keeping an existing property's enumerability.
    pub fn set(&mut self, key: &str, value: Value) {
        if let ObjectKind::Array(elements) = &mut self.kind {
            if let Some(idx) = array_index(key) {
                if idx >= elements.len() {
                    elements.resize(idx + 1, Value::Undefined);
                }
                elements[idx] = value;
                return;
            }
            if key == "length" {
                let len = value.to_number();
                if len >= 0.0 && len.fract() == 0.0 {
                    elements.resize(len as usize, Value::Undefined);
                }
                return;
            }
        }
        match self.properties.get_mut(key) {
            Some(prop) => prop.value = value,
            None => {
                self.properties.insert(Rc::from(key), Property::data(value));
            }
        }
    }

    /// Create or replace a non-enumerable property.
    pub fn define(&mut self, key: &str, value: Value) {
        self.properties.insert(Rc::from(key), Property::hidden(value));
    }

    /// Returns `true` unless the property exists and cannot be removed.
    pub fn delete(&mut self, key: &str) -> bool {
        if let ObjectKind::Array(elements) = &mut self.kind {
            if key == "length" {
                return false;
            }
            if let Some(idx) = array_index(key) {
                if idx < elements.len() {
                    elements[idx] = Value::Undefined;
                }
                return true;
            }
        }
        self.properties.shift_remove(key);
        true
    }

    /// Keys `for-in` visits: array indices, then own enumerable properties
    /// in insertion order, then inherited ones not shadowed.
    pub fn enumerable_keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = Vec::new();
        if let ObjectKind::Array(elements) = &self.kind {
            keys.extend((0..elements.len()).map(|i| Rc::from(i.to_string().as_str())));
        }
        keys.extend(
            self.properties
                .iter()
                .filter(|(_, p)| p.enumerable)
                .map(|(k, _)| k.clone()),
        );
        if let Some(proto) = &self.prototype {
            for key in proto.borrow().enumerable_keys() {
                if !self.has_own_property(&key) && !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

impl fmt::Debug for JsObject {
    // Scopes and closures form cycles; print the shape only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind)
            .field("keys", &self.properties.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjectKind::Function(func) => write!(f, "[Function: {}]", func.name),
            ObjectKind::Array(elements) => {
                write!(f, "[")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "]")
            }
            ObjectKind::Error(kind) => write!(f, "[{}]", kind),
            ObjectKind::Continuation(_) => write!(f, "[object Continuation]"),
            ObjectKind::Ordinary => write!(f, "[object Object]"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope chains
// ---------------------------------------------------------------------------

/// The innermost scope on the chain starting at `scope` that binds `name`.
pub fn find_binding(scope: &ObjectRef, name: &str) -> Option<ObjectRef> {
    let mut current = Some(scope.clone());
    while let Some(s) = current {
        if s.borrow().has_property(name) {
            return Some(s);
        }
        current = s.borrow().parent_scope.clone();
    }
    None
}

/// Resolve `name` through the scope chain.
pub fn lookup(scope: &ObjectRef, name: &str) -> Option<Value> {
    find_binding(scope, name).and_then(|s| s.borrow().get(name))
}

/// The outermost scope of the chain (the global object).
pub fn outermost(scope: &ObjectRef) -> ObjectRef {
    let mut current = scope.clone();
    loop {
        let parent = current.borrow().parent_scope.clone();
        match parent {
            Some(p) => current = p,
            None => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_index_and_length() {
        let mut arr = JsObject::array(vec![Value::Number(1.0)]);
        arr.set("3", Value::Number(4.0));
        assert_eq!(arr.get("length"), Some(Value::Number(4.0)));
        assert_eq!(arr.get("1"), Some(Value::Undefined));
        assert_eq!(arr.get("3"), Some(Value::Number(4.0)));
        arr.set("length", Value::Number(1.0));
        assert_eq!(arr.get("3"), None);
    }

    #[test]
    fn prototype_chain_lookup() {
        let proto = GcPtr::new(JsObject::ordinary());
        proto.borrow_mut().set("greeting", Value::string("hi"));
        let obj = JsObject::with_prototype(Some(proto.clone()));
        assert_eq!(obj.get("greeting"), Some(Value::string("hi")));
        assert!(obj.has_property("greeting"));
        assert!(!obj.has_own_property("greeting"));
    }

    #[test]
    fn enumerable_keys_follow_insertion_order() {
        let proto = GcPtr::new(JsObject::ordinary());
        proto.borrow_mut().set("inherited", Value::Null);
        proto.borrow_mut().set("b", Value::Null);
        let mut obj = JsObject::with_prototype(Some(proto));
        obj.set("b", Value::Null);
        obj.set("a", Value::Null);
        obj.define("hidden", Value::Null);
        let keys: Vec<String> = obj.enumerable_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a", "inherited"]);
    }

    #[test]
    fn delete_removes_own_properties() {
        let mut obj = JsObject::ordinary();
        obj.set("x", Value::Number(1.0));
        assert!(obj.delete("x"));
        assert!(!obj.has_own_property("x"));
        assert!(obj.delete("never"));
    }

    #[test]
    fn scope_chain_resolution() {
        let global = GcPtr::new(JsObject::scope(None));
        global.borrow_mut().set("x", Value::Number(1.0));
        let inner = GcPtr::new(JsObject::scope(Some(global.clone())));
        inner.borrow_mut().set("y", Value::Number(2.0));

        assert_eq!(lookup(&inner, "x"), Some(Value::Number(1.0)));
        assert_eq!(lookup(&inner, "y"), Some(Value::Number(2.0)));
        assert_eq!(lookup(&inner, "z"), None);
        assert!(find_binding(&inner, "x").is_some_and(|s| s.ptr_eq(&global)));
        assert!(outermost(&inner).ptr_eq(&global));
    }

    #[test]
    fn key_enumerator_walks_once() {
        let mut keys = KeyEnumerator::new(vec![Rc::from("a"), Rc::from("b")]);
        assert!(keys.advance());
        assert_eq!(keys.current(), Value::string("a"));
        assert!(keys.advance());
        assert_eq!(keys.current(), Value::string("b"));
        assert!(!keys.advance());
        assert_eq!(keys.current(), Value::Undefined);
    }
}
