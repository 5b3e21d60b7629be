//! Runtime values and scopes.
//!
//! Values are single-threaded (`Rc`/`RefCell`): the whole interpreter runs on
//! one `LocalSet`, so nothing here needs to be `Send`.
//!
//! # Callables
//!
//! - [`Function`]: a `def` from the program, carrying its closure scope.
//! - [`NativeFunction`]: a Rust closure exposed to scripts. Async natives
//!   return a [`Coroutine`] that must be awaited to make progress.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use super::ast::FunctionDef;
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::interpreter::Interpreter;

pub type ScopeRef = Rc<Scope>;
pub type SyncNativeFn = dyn Fn(&[Value]) -> ScriptResult<Value>;
pub type AsyncNativeFn = dyn Fn(Vec<Value>) -> LocalBoxFuture<'static, ScriptResult<Value>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Module(Rc<ModuleObject>),
    Coroutine(Rc<Coroutine>),
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Coroutine(_) => "coroutine",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    /// Integer view used by hardware arguments: floats are truncated.
    pub fn to_int(&self) -> ScriptResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            Value::Float(_) => Err(ScriptError::new(
                ErrorKind::Overflow,
                "cannot convert float infinity or NaN to integer",
            )),
            other => Err(ScriptError::type_error(format!(
                "expected a number, got '{}'",
                other.type_name()
            ))),
        }
    }

    /// Strict integer view used for indexing and `range`.
    pub fn to_index(&self) -> ScriptResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(ScriptError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        }
    }

    pub fn to_float(&self) -> ScriptResult<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Ok(*f),
            other => Err(ScriptError::type_error(format!(
                "expected a number, got '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Text form used by `print` and `str()`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Text form used inside containers.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Native(n) => format!("<built-in function {}>", n.name),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Coroutine(c) => format!("<coroutine object {}>", c.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

/// Python-style float formatting: integral values keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

pub fn range_len(value: &Value) -> i64 {
    match value {
        Value::Range { start, stop, step } => {
            if *step > 0 && start < stop {
                (stop - start + step - 1) / step
            } else if *step < 0 && start > stop {
                (start - stop - step - 1) / (-step)
            } else {
                0
            }
        }
        _ => 0,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| values_equal(l, r))
        }
        (Value::Int(x), Value::Int(y)) => x == y,
        (l, r) if l.is_number() && r.is_number() => match (l.to_float(), r.to_float()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        (
            Value::Range {
                start: s1,
                stop: e1,
                step: t1,
            },
            Value::Range {
                start: s2,
                stop: e2,
                step: t2,
            },
        ) => s1 == s2 && e1 == e2 && t1 == t2,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Coroutine(x), Value::Coroutine(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

pub fn compare_values(a: &Value, b: &Value, op: &str) -> ScriptResult<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (l, r) if l.is_number() && r.is_number() => {
            let (x, y) = (l.to_float()?, r.to_float()?);
            // NaN compares false both ways; `Equal` keeps `<` and `>` false.
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let x = x.borrow().clone();
            let y = y.borrow().clone();
            for (l, r) in x.iter().zip(y.iter()) {
                if !values_equal(l, r) {
                    return compare_values(l, r, op);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(ScriptError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

// =============================================================================
// Callables
// =============================================================================

/// A `def` bound to the scope it was defined in.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub closure: ScopeRef,
    pub(crate) interpreter: Interpreter,
}

pub enum NativeBody {
    Sync(Box<SyncNativeFn>),
    Async(Box<AsyncNativeFn>),
}

pub struct NativeFunction {
    pub name: String,
    pub body: NativeBody,
}

impl NativeFunction {
    pub fn sync<F>(name: impl Into<String>, f: F) -> Value
    where
        F: Fn(&[Value]) -> ScriptResult<Value> + 'static,
    {
        Value::Native(Rc::new(NativeFunction {
            name: name.into(),
            body: NativeBody::Sync(Box::new(f)),
        }))
    }

    pub fn asynchronous<F>(name: impl Into<String>, f: F) -> Value
    where
        F: Fn(Vec<Value>) -> LocalBoxFuture<'static, ScriptResult<Value>> + 'static,
    {
        Value::Native(Rc::new(NativeFunction {
            name: name.into(),
            body: NativeBody::Async(Box::new(f)),
        }))
    }

    pub fn is_async(&self) -> bool {
        matches!(self.body, NativeBody::Async(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineOrigin {
    /// Produced by a board call; dropping it would silently lose work.
    Native,
    /// Produced by calling an `async def`.
    Script,
}

/// A suspended call waiting to be awaited. Can only be driven once.
pub struct Coroutine {
    pub name: String,
    pub origin: CoroutineOrigin,
    future: RefCell<Option<LocalBoxFuture<'static, ScriptResult<Value>>>>,
}

impl Coroutine {
    pub fn new(
        name: impl Into<String>,
        origin: CoroutineOrigin,
        future: LocalBoxFuture<'static, ScriptResult<Value>>,
    ) -> Self {
        Self {
            name: name.into(),
            origin,
            future: RefCell::new(Some(future)),
        }
    }

    pub fn take(&self) -> ScriptResult<LocalBoxFuture<'static, ScriptResult<Value>>> {
        self.future.borrow_mut().take().ok_or_else(|| {
            ScriptError::runtime(format!(
                "cannot reuse already awaited coroutine '{}'",
                self.name
            ))
        })
    }
}

// =============================================================================
// Modules
// =============================================================================

/// A named bag of attributes: importable modules and hardware namespaces.
pub struct ModuleObject {
    pub name: String,
    attrs: RefCell<BTreeMap<String, Value>>,
}

impl ModuleObject {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            attrs: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }

    /// Names exported by `from <module> import *`.
    pub fn public_names(&self) -> Vec<String> {
        self.attrs
            .borrow()
            .keys()
            .filter(|k| !k.starts_with('_'))
            .cloned()
            .collect()
    }

    pub fn define_sync<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> ScriptResult<Value> + 'static,
    {
        let qualified = format!("{}.{}", self.name, name);
        self.set(name, NativeFunction::sync(qualified, f));
    }

    pub fn define_async<F>(&self, name: &str, f: F)
    where
        F: Fn(Vec<Value>) -> LocalBoxFuture<'static, ScriptResult<Value>> + 'static,
    {
        let qualified = format!("{}.{}", self.name, name);
        self.set(name, NativeFunction::asynchronous(qualified, f));
    }

    /// Define string constants, e.g. `Button.A == "A"`.
    pub fn define_constants(&self, pairs: &[(&str, &str)]) {
        for (name, value) in pairs {
            self.set(*name, Value::str(value));
        }
    }
}

// =============================================================================
// Scopes
// =============================================================================

/// A variable frame. Function frames chain to the scope they were defined in.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<ScopeRef>,
    declared_global: RefCell<HashSet<String>>,
    /// Dynamic call depth of the frame.
    pub depth: usize,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            declared_global: RefCell::new(HashSet::new()),
            depth: 0,
        })
    }

    pub fn child(parent: &ScopeRef, depth: usize) -> ScopeRef {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            declared_global: RefCell::new(HashSet::new()),
            depth,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn outermost(self: &Rc<Self>) -> ScopeRef {
        let mut scope = self.clone();
        while let Some(parent) = scope.parent.clone() {
            scope = parent;
        }
        scope
    }

    pub fn assign(self: &Rc<Self>, name: &str, value: Value) {
        if self.parent.is_some() && self.declared_global.borrow().contains(name) {
            self.outermost().set_local(name, value);
        } else {
            self.set_local(name, value);
        }
    }

    pub fn set_local(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn declare_global(&self, name: &str) {
        self.declared_global.borrow_mut().insert(name.to_string());
    }

    /// Drop every binding. Breaks `Function -> closure -> Function` cycles.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.vars.borrow_mut().drain().map(|(_, v)| v).collect();
        drop(drained);
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

/// Check an argument count for a native call.
pub fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> ScriptResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ScriptError::type_error(format!(
            "{}() takes {} arguments ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}
