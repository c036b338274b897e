use crate::bridge::{JsFunction, JsObject};
use crate::error::{BridgeError, Result};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A value on the host side of the bridge.
///
/// Primitives are copied across the boundary. Host objects and functions
/// cross as V8 proxies and come back as the very same `Rc`. Values created
/// by scripts come back as `JsObject` / `JsFunction` handles.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Copied into a fresh JS array on every crossing
    Array(Vec<HostValue>),
    Object(Rc<dyn HostObject>),
    Function(HostFunction),
    JsObject(JsObject),
    JsFunction(JsFunction),
}

impl HostValue {
    pub fn object<T: HostObject>(object: T) -> Self {
        Self::Object(Rc::new(object))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<dyn HostObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_js_object(&self) -> Option<&JsObject> {
        match self {
            Self::JsObject(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_js_function(&self) -> Option<&JsFunction> {
        match self {
            Self::JsFunction(f) => Some(f),
            _ => None,
        }
    }

    /// Downcast a host object to its concrete type.
    pub fn downcast_ref<T: HostObject>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    /// The `__name__` used by `Context::expose`.
    pub fn exposed_name(&self) -> Option<String> {
        match self {
            Self::Object(o) => o.name().map(str::to_string),
            Self::Function(f) if !f.name().is_empty() => Some(f.name().to_string()),
            _ => None,
        }
    }

    /// Same object on the host side (pointer identity, not equality).
    pub fn same_object(&self, other: &HostValue) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "host object",
            Self::Function(_) => "host function",
            Self::JsObject(_) => "JsObject",
            Self::JsFunction(_) => "JsFunction",
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(o) => write!(f, "Object(<{}>)", o.class_name()),
            Self::Function(func) => write!(f, "Function(<{}>)", func.name()),
            Self::JsObject(_) => f.write_str("JsObject(..)"),
            Self::JsFunction(_) => f.write_str("JsFunction(..)"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        Self::Function(value)
    }
}

impl From<Rc<dyn HostObject>> for HostValue {
    fn from(value: Rc<dyn HostObject>) -> Self {
        Self::Object(value)
    }
}

/// An object living on the host side, seen by scripts through a proxy.
///
/// Attribute access from scripts is routed to `get` and `set`. Keys the
/// object does not handle fall through to an ordinary JS object, so scripts
/// may still attach their own properties.
pub trait HostObject: Any {
    /// Class name used for the V8 template of this object.
    fn class_name(&self) -> &str;

    /// Name under which `Context::expose` publishes the object.
    fn name(&self) -> Option<&str> {
        None
    }

    fn get(&self, key: &str) -> Option<HostValue>;

    /// Returns `Ok(false)` for keys the object does not handle.
    fn set(&self, _key: &str, _value: HostValue) -> Result<bool> {
        Ok(false)
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn keys(&self) -> Vec<String>;

    /// Objects that return `false` are never put in the identity cache:
    /// every crossing creates a new proxy.
    fn weakly_referenceable(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}

pub(crate) fn object_identity(object: &Rc<dyn HostObject>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

type HostFn = dyn Fn(&[HostValue]) -> Result<HostValue>;

/// A host function callable from scripts.
#[derive(Clone)]
pub struct HostFunction {
    inner: Rc<HostFunctionInner>,
}

struct HostFunctionInner {
    name: String,
    func: Box<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue> + 'static,
    {
        Self {
            inner: Rc::new(HostFunctionInner {
                name: name.into(),
                func: Box::new(func),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        (self.inner.func)(args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.inner.name)
            .finish()
    }
}

type Constructor = dyn Fn() -> Result<Rc<dyn HostObject>>;

/// A host class: a name plus a zero-argument constructor.
///
/// Used to default-construct the global object of a new context.
#[derive(Clone)]
pub struct HostClass {
    name: String,
    constructor: Rc<Constructor>,
}

impl HostClass {
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<Rc<dyn HostObject>> + 'static,
    {
        Self {
            name: name.into(),
            constructor: Rc::new(constructor),
        }
    }

    /// Class for a type constructed with `Default`.
    pub fn of<T: HostObject + Default>() -> Self {
        let name = T::default().class_name().to_string();
        Self::new(name, || Ok(Rc::new(T::default()) as Rc<dyn HostObject>))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn construct(&self) -> Result<Rc<dyn HostObject>> {
        (self.constructor)()
    }
}

impl fmt::Debug for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClass").field("name", &self.name).finish()
    }
}

/// A named collection of host values, exposed as a whole with
/// `Context::expose_module`.
///
/// Members whose name starts with `_` are private and never exposed.
#[derive(Debug)]
pub struct HostModule {
    name: String,
    members: RefCell<BTreeMap<String, HostValue>>,
}

impl HostModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn with(self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.members.borrow_mut().insert(name.into(), value.into());
    }

    /// Snapshot of the public members, in name order.
    pub fn public_members(&self) -> Vec<(String, HostValue)> {
        self.members
            .borrow()
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl HostObject for HostModule {
    fn class_name(&self) -> &str {
        "module"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn get(&self, key: &str) -> Option<HostValue> {
        self.members.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: HostValue) -> Result<bool> {
        if key.is_empty() {
            return Err(BridgeError::type_error("module member name cannot be empty"));
        }
        self.insert(key, value);
        Ok(true)
    }

    fn keys(&self) -> Vec<String> {
        self.members.borrow().keys().cloned().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_public_members() {
        let module = HostModule::new("math")
            .with("pi", 1.5)
            .with("_secret", "hidden")
            .with("name", "math");

        let names: Vec<_> = module
            .public_members()
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, vec!["name", "pi"]);
        assert_eq!(module.keys().len(), 3);
    }

    #[test]
    fn test_exposed_name() {
        let f = HostFunction::new("add", |_| Ok(HostValue::Undefined));
        assert_eq!(HostValue::from(f).exposed_name().as_deref(), Some("add"));

        let anonymous = HostFunction::new("", |_| Ok(HostValue::Undefined));
        assert_eq!(HostValue::from(anonymous).exposed_name(), None);

        let module = HostValue::object(HostModule::new("os"));
        assert_eq!(module.exposed_name().as_deref(), Some("os"));

        assert_eq!(HostValue::Number(1.0).exposed_name(), None);
    }

    #[test]
    fn test_same_object_is_identity() {
        let a: Rc<dyn HostObject> = Rc::new(HostModule::new("a"));
        let b: Rc<dyn HostObject> = Rc::new(HostModule::new("a"));

        assert!(HostValue::Object(a.clone()).same_object(&HostValue::Object(a.clone())));
        assert!(!HostValue::Object(a).same_object(&HostValue::Object(b)));
    }

    #[test]
    fn test_host_function_call() {
        let f = HostFunction::new("sum", |args| {
            Ok(HostValue::Number(
                args.iter().filter_map(HostValue::as_number).sum(),
            ))
        });

        let result = f.call(&[1.0.into(), 2.0.into()]).unwrap();
        assert_eq!(result.as_number(), Some(3.0));
        assert!(f.ptr_eq(&f.clone()));
    }

    #[test]
    fn test_host_class_of() {
        let class = HostClass::of::<HostModuleDefault>();
        assert_eq!(class.name(), "Defaulted");
        assert!(class.construct().is_ok());
    }

    #[derive(Default)]
    struct HostModuleDefault;

    impl HostObject for HostModuleDefault {
        fn class_name(&self) -> &str {
            "Defaulted"
        }

        fn get(&self, _key: &str) -> Option<HostValue> {
            None
        }

        fn keys(&self) -> Vec<String> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
