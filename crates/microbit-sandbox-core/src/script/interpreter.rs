//! Tree-walking async interpreter.
//!
//! Execution is cooperative: the program only yields at `await`. A call to an
//! `async def` (or to an async board function) produces a [`Coroutine`] that
//! does nothing until awaited, so everything between two awaits runs without
//! interleaving. This is what makes LED loops and pin toggling in learner code
//! deterministic.
//!
//! Recursive evaluation returns boxed local futures; nothing here is `Send`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use tracing::{debug, warn};

use super::ast::*;
use super::builtins;
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::value::*;

/// Line sink for `print` and runtime warnings.
pub type OutputSink = Rc<dyn Fn(&str)>;

/// Runs detached work (e.g. un-awaited board calls) on the caller's task set.
pub type Spawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// Default call depth before `RecursionError`.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Cross-thread flag that stops a running program at its next statement.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Everything a program can reach besides its own globals.
pub struct ExecutionEnv {
    pub output: OutputSink,
    /// Modules available to `import`.
    pub modules: BTreeMap<String, Rc<ModuleObject>>,
    pub spawner: Option<Spawner>,
    pub interrupt: InterruptHandle,
    pub max_depth: usize,
}

impl Default for ExecutionEnv {
    fn default() -> Self {
        Self {
            output: Rc::new(|_| {}),
            modules: BTreeMap::new(),
            spawner: None,
            interrupt: InterruptHandle::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

struct RunContext {
    globals: ScopeRef,
    builtins: HashMap<String, Value>,
    env: ExecutionEnv,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// One program run: a global scope plus the environment it executes in.
#[derive(Clone)]
pub struct Interpreter {
    ctx: Rc<RunContext>,
}

impl Interpreter {
    pub fn new(env: ExecutionEnv) -> Self {
        let output = env.output.clone();
        Self {
            ctx: Rc::new(RunContext {
                globals: Scope::root(),
                builtins: builtins::create(output),
                env,
            }),
        }
    }

    /// Run a parsed program in this interpreter's global scope.
    pub async fn execute(&self, program: &Program) -> ScriptResult<()> {
        let globals = self.ctx.globals.clone();
        match self.exec_block(&program.body, &globals).await? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break => Err(ScriptError::new(ErrorKind::Syntax, "'break' outside loop")),
            Flow::Continue => Err(ScriptError::new(
                ErrorKind::Syntax,
                "'continue' not properly in loop",
            )),
        }
    }

    /// `from <module> import *` into the global scope.
    pub fn import_all(&self, module: &str) -> ScriptResult<()> {
        let module = self.find_module(module)?;
        for name in module.public_names() {
            if let Some(value) = module.get(&name) {
                self.ctx.globals.set_local(&name, value);
            }
        }
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.ctx.globals.lookup(name)
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.ctx.globals.set_local(name, value);
    }

    /// Drop all globals so functions and their closures can be freed.
    pub fn clear(&self) {
        self.ctx.globals.clear();
    }

    pub fn output(&self, line: &str) {
        (self.ctx.env.output)(line);
    }

    fn find_module(&self, name: &str) -> ScriptResult<Rc<ModuleObject>> {
        self.ctx.env.modules.get(name).cloned().ok_or_else(|| {
            ScriptError::new(ErrorKind::Import, format!("No module named '{}'", name))
        })
    }

    fn check_interrupt(&self) -> ScriptResult<()> {
        if self.ctx.env.interrupt.is_interrupted() {
            return Err(ScriptError::new(
                ErrorKind::Interrupted,
                "execution was terminated",
            ));
        }
        Ok(())
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        match &self.ctx.env.spawner {
            Some(spawner) => spawner(task),
            None => {
                tokio::task::spawn_local(task);
            }
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_block<'a>(
        &'a self,
        block: &'a [Stmt],
        scope: &'a ScopeRef,
    ) -> LocalBoxFuture<'a, ScriptResult<Flow>> {
        async move {
            for stmt in block {
                match self.exec_stmt(stmt, scope).await {
                    Ok(Flow::Normal) => {}
                    Ok(flow) => return Ok(flow),
                    Err(e) => return Err(e.at_line(stmt.line)),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    async fn exec_stmt(&self, stmt: &Stmt, scope: &ScopeRef) -> ScriptResult<Flow> {
        self.check_interrupt()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let value = self.eval(expr, scope).await?;
                if let Value::Coroutine(coroutine) = value {
                    self.discard_coroutine(&coroutine);
                }
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, scope).await?;
                self.assign(target, value, scope).await?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(name, scope)?,
                    Target::Index { object, index } => {
                        let object = self.eval(object, scope).await?;
                        let index = self.eval(index, scope).await?;
                        get_index(&object, &index)?
                    }
                };
                let rhs = self.eval(value, scope).await?;
                let updated = binary_op(*op, &current, &rhs)?;
                self.assign(target, updated, scope).await?;
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, scope).await?.truthy() {
                        return self.exec_block(body, scope).await;
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body, scope).await;
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, scope).await?.truthy() {
                    self.check_interrupt()?;
                    match self.exec_block(body, scope).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { var, iter, body } => {
                let iterable = self.eval(iter, scope).await?;
                return self.exec_for(var, &iterable, body, scope).await;
            }
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::new();
                for param in &def.params {
                    if let Some(default) = &param.default {
                        defaults.push(self.eval(default, scope).await?);
                    }
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                    closure: scope.clone(),
                    interpreter: self.clone(),
                };
                scope.assign(&def.name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope).await?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Global(names) => {
                for name in names {
                    scope.declare_global(name);
                }
            }
            StmtKind::Import { module, alias } => {
                let object = self.find_module(module)?;
                let bound = alias.as_deref().unwrap_or(module);
                scope.assign(bound, Value::Module(object));
            }
            StmtKind::FromImport { module, names } => {
                let object = self.find_module(module)?;
                match names {
                    ImportNames::Star => {
                        for name in object.public_names() {
                            if let Some(value) = object.get(&name) {
                                scope.assign(&name, value);
                            }
                        }
                    }
                    ImportNames::Names(names) => {
                        for (name, alias) in names {
                            let value = object.get(name).ok_or_else(|| {
                                ScriptError::new(
                                    ErrorKind::Import,
                                    format!("cannot import name '{}' from '{}'", name, module),
                                )
                            })?;
                            scope.assign(alias.as_deref().unwrap_or(name), value);
                        }
                    }
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    async fn exec_for(
        &self,
        var: &str,
        iterable: &Value,
        body: &[Stmt],
        scope: &ScopeRef,
    ) -> ScriptResult<Flow> {
        macro_rules! run_body {
            ($item:expr) => {{
                self.check_interrupt()?;
                scope.assign(var, $item);
                match self.exec_block(body, scope).await? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            }};
        }

        match iterable {
            Value::Range { start, stop, step } => {
                let (start, stop, step) = (*start, *stop, *step);
                let mut i = start;
                loop {
                    if (step > 0 && i >= stop) || (step < 0 && i <= stop) {
                        break;
                    }
                    run_body!(Value::Int(i));
                    i = match i.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
            Value::List(items) => {
                // Snapshot so the body may mutate the list.
                let snapshot = items.borrow().clone();
                for item in snapshot {
                    run_body!(item);
                }
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                for c in chars {
                    run_body!(Value::str(c.to_string()));
                }
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        }
        Ok(Flow::Normal)
    }

    async fn assign(&self, target: &Target, value: Value, scope: &ScopeRef) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                scope.assign(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object, scope).await?;
                let index = self.eval(index, scope).await?;
                set_index(&object, &index, value)
            }
        }
    }

    /// An un-awaited coroutine in statement position.
    ///
    /// Board calls still run (detached) so their effects are not lost; script
    /// coroutines are dropped with a warning, matching Python.
    fn discard_coroutine(&self, coroutine: &Rc<Coroutine>) {
        match coroutine.origin {
            CoroutineOrigin::Native => {
                let Ok(future) = coroutine.take() else { return };
                debug!(call = %coroutine.name, "running un-awaited board call in background");
                let output = self.ctx.env.output.clone();
                self.spawn(
                    async move {
                        if let Err(e) = future.await {
                            output(&e.to_string());
                        }
                    }
                    .boxed_local(),
                );
            }
            CoroutineOrigin::Script => {
                warn!(function = %coroutine.name, "coroutine was never awaited");
                self.output(&format!(
                    "RuntimeWarning: coroutine '{}' was never awaited",
                    coroutine.name
                ));
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn lookup(&self, name: &str, scope: &ScopeRef) -> ScriptResult<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.ctx.builtins.get(name) {
            return Ok(value.clone());
        }
        Err(ScriptError::new(
            ErrorKind::Name,
            format!("name '{}' is not defined", name),
        ))
    }

    fn eval<'a>(
        &'a self,
        expr: &'a Expr,
        scope: &'a ScopeRef,
    ) -> LocalBoxFuture<'a, ScriptResult<Value>> {
        async move {
            let result = match &expr.kind {
                ExprKind::None => Ok(Value::None),
                ExprKind::Bool(b) => Ok(Value::Bool(*b)),
                ExprKind::Int(i) => Ok(Value::Int(*i)),
                ExprKind::Float(f) => Ok(Value::Float(*f)),
                ExprKind::Str(s) => Ok(Value::Str(s.clone())),
                ExprKind::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, scope).await?);
                    }
                    Ok(Value::list(values))
                }
                ExprKind::Name(name) => self.lookup(name, scope),
                ExprKind::Attribute { object, name } => {
                    let object = self.eval(object, scope).await?;
                    get_attribute(&object, name)
                }
                ExprKind::Index { object, index } => {
                    let object = self.eval(object, scope).await?;
                    let index = self.eval(index, scope).await?;
                    get_index(&object, &index)
                }
                ExprKind::Call { func, args } => {
                    let callee = self.eval(func, scope).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, scope).await?);
                    }
                    call_value_at(&callee, values, scope.depth + 1).await
                }
                ExprKind::Await(inner) => {
                    let value = self.eval(inner, scope).await?;
                    match value {
                        Value::Coroutine(coroutine) => {
                            let future = coroutine.take()?;
                            future.await
                        }
                        other => Ok(other),
                    }
                }
                ExprKind::Unary { op, operand } => {
                    let value = self.eval(operand, scope).await?;
                    unary_op(*op, &value)
                }
                ExprKind::Binary { op, left, right } => {
                    let l = self.eval(left, scope).await?;
                    let r = self.eval(right, scope).await?;
                    binary_op(*op, &l, &r)
                }
                ExprKind::Compare { first, rest } => {
                    let mut left = self.eval(first, scope).await?;
                    for (op, right) in rest {
                        let right = self.eval(right, scope).await?;
                        if !compare(*op, &left, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        left = right;
                    }
                    Ok(Value::Bool(true))
                }
                ExprKind::And(l, r) => {
                    let left = self.eval(l, scope).await?;
                    if !left.truthy() {
                        return Ok(left);
                    }
                    self.eval(r, scope).await
                }
                ExprKind::Or(l, r) => {
                    let left = self.eval(l, scope).await?;
                    if left.truthy() {
                        return Ok(left);
                    }
                    self.eval(r, scope).await
                }
                ExprKind::Conditional { cond, then, orelse } => {
                    if self.eval(cond, scope).await?.truthy() {
                        self.eval(then, scope).await
                    } else {
                        self.eval(orelse, scope).await
                    }
                }
            };
            result.map_err(|e| e.at_line(expr.line))
        }
        .boxed_local()
    }
}

// =============================================================================
// Calls
// =============================================================================

/// Call a script-visible value with positional arguments.
///
/// Returns the call's result; for async callables that is a coroutine which
/// has not started yet.
pub fn call_value(callee: &Value, args: Vec<Value>) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    call_value_at(callee, args, 0)
}

/// Call a handler registered by the program and drive it to completion.
pub async fn invoke_callback(callee: Value, args: Vec<Value>) -> ScriptResult<Value> {
    let result = call_value(&callee, args).await?;
    match result {
        Value::Coroutine(coroutine) => coroutine.take()?.await,
        other => Ok(other),
    }
}

fn call_value_at(
    callee: &Value,
    args: Vec<Value>,
    depth: usize,
) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    match callee {
        Value::Function(function) => call_function(function.clone(), args, depth),
        Value::Native(native) => match &native.body {
            NativeBody::Sync(f) => future::ready(f(&args)).boxed_local(),
            NativeBody::Async(f) => {
                let pending = f(args);
                let coroutine = Coroutine::new(native.name.clone(), CoroutineOrigin::Native, pending);
                future::ready(Ok(Value::Coroutine(Rc::new(coroutine)))).boxed_local()
            }
        },
        other => future::ready(Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))))
        .boxed_local(),
    }
}

fn call_function(
    function: Rc<Function>,
    args: Vec<Value>,
    depth: usize,
) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    let frame = match bind_arguments(&function, args, depth) {
        Ok(frame) => frame,
        Err(e) => return future::ready(Err(e)).boxed_local(),
    };
    if function.def.is_async {
        let name = function.def.name.clone();
        let body = run_body(function, frame);
        let coroutine = Coroutine::new(name, CoroutineOrigin::Script, body);
        return future::ready(Ok(Value::Coroutine(Rc::new(coroutine)))).boxed_local();
    }
    run_body(function, frame)
}

fn bind_arguments(function: &Function, args: Vec<Value>, depth: usize) -> ScriptResult<ScopeRef> {
    let interpreter = &function.interpreter;
    interpreter.check_interrupt()?;
    if depth > interpreter.ctx.env.max_depth {
        return Err(ScriptError::new(
            ErrorKind::Recursion,
            "maximum recursion depth exceeded",
        ));
    }

    let def = &function.def;
    let params = &def.params;
    if args.len() > params.len() {
        return Err(ScriptError::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            def.name,
            params.len(),
            args.len()
        )));
    }

    let frame = Scope::child(&function.closure, depth);
    let first_default = params.len() - function.defaults.len();
    let mut args = args.into_iter();
    for (i, param) in params.iter().enumerate() {
        let value = match args.next() {
            Some(value) => value,
            None if i >= first_default => function.defaults[i - first_default].clone(),
            None => {
                return Err(ScriptError::type_error(format!(
                    "{}() missing required argument: '{}'",
                    def.name, param.name
                )))
            }
        };
        frame.set_local(&param.name, value);
    }
    Ok(frame)
}

fn run_body(function: Rc<Function>, frame: ScopeRef) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    async move {
        let interpreter = function.interpreter.clone();
        match interpreter.exec_block(&function.def.body, &frame).await? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::None),
            Flow::Break => Err(ScriptError::new(ErrorKind::Syntax, "'break' outside loop")),
            Flow::Continue => Err(ScriptError::new(
                ErrorKind::Syntax,
                "'continue' not properly in loop",
            )),
        }
    }
    .boxed_local()
}

// =============================================================================
// Operators
// =============================================================================

fn unsupported(op: &str, l: &Value, r: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        l.type_name(),
        r.type_name()
    ))
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::Overflow, "integer result too large")
}

fn int_operands(l: &Value, r: &Value) -> Option<(i64, i64)> {
    match (l, r) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Some((l.to_index().ok()?, r.to_index().ok()?))
        }
        _ => None,
    }
}

/// Longest string or list a repetition may produce.
const MAX_REPEAT_LEN: usize = 1 << 24;

fn repeat(items: &Value, count: i64) -> ScriptResult<Value> {
    let count = count.max(0) as usize;
    let too_large = || ScriptError::new(ErrorKind::Overflow, "repeated sequence too large");
    let checked_len = |len: usize| {
        len.checked_mul(count)
            .filter(|total| *total <= MAX_REPEAT_LEN)
            .ok_or_else(too_large)
    };
    match items {
        Value::Str(s) => {
            checked_len(s.len())?;
            Ok(Value::str(s.repeat(count)))
        }
        Value::List(list) => {
            let list = list.borrow();
            let mut out = Vec::with_capacity(checked_len(list.len())?);
            for _ in 0..count {
                out.extend(list.iter().cloned());
            }
            Ok(Value::list(out))
        }
        other => Ok(other.clone()),
    }
}

pub(crate) fn binary_op(op: BinOp, l: &Value, r: &Value) -> ScriptResult<Value> {
    let symbol = op.symbol();
    if let Some((a, b)) = int_operands(l, r) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    return Err(ScriptError::new(ErrorKind::ZeroDivision, "division by zero"));
                }
                Ok(Value::Float(a as f64 / b as f64))
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err(ScriptError::new(
                        ErrorKind::ZeroDivision,
                        "integer division or modulo by zero",
                    ));
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    Ok(Value::Int(q - 1))
                } else {
                    Ok(Value::Int(q))
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(ScriptError::new(
                        ErrorKind::ZeroDivision,
                        "integer division or modulo by zero",
                    ));
                }
                let m = a.checked_rem(b).ok_or_else(overflow)?;
                if m != 0 && ((m < 0) != (b < 0)) {
                    Ok(Value::Int(m + b))
                } else {
                    Ok(Value::Int(m))
                }
            }
            BinOp::Pow => {
                if b < 0 {
                    return Ok(Value::Float((a as f64).powf(b as f64)));
                }
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
            }
        };
    }

    if l.is_number() && r.is_number() {
        let (a, b) = (l.to_float()?, r.to_float()?);
        return match op {
            BinOp::Add => Ok(Value::Float(a + b)),
            BinOp::Sub => Ok(Value::Float(a - b)),
            BinOp::Mul => Ok(Value::Float(a * b)),
            BinOp::Div => {
                if b == 0.0 {
                    return Err(ScriptError::new(
                        ErrorKind::ZeroDivision,
                        "float division by zero",
                    ));
                }
                Ok(Value::Float(a / b))
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    return Err(ScriptError::new(
                        ErrorKind::ZeroDivision,
                        "float floor division by zero",
                    ));
                }
                Ok(Value::Float((a / b).floor()))
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(ScriptError::new(ErrorKind::ZeroDivision, "float modulo"));
                }
                Ok(Value::Float(a - b * (a / b).floor()))
            }
            BinOp::Pow => Ok(Value::Float(a.powf(b))),
        };
    }

    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Str(_) | Value::List(_), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::Str(_) | Value::List(_)) => {
            let seq = if matches!(l, Value::Int(_)) { r } else { l };
            repeat(seq, *n)
        }
        _ => Err(unsupported(symbol, l, r)),
    }
}

fn unary_op(op: UnaryOp, value: &Value) -> ScriptResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match value {
            Value::Int(_) | Value::Bool(_) => value
                .to_index()?
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(overflow),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ScriptError::type_error(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
        UnaryOp::Pos => match value {
            Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.to_index()?)),
            Value::Float(f) => Ok(Value::Float(*f)),
            other => Err(ScriptError::type_error(format!(
                "bad operand type for unary +: '{}'",
                other.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_ref())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range { start, step, .. } => {
            let Ok(n) = item.to_index() else {
                return Ok(false);
            };
            let len = range_len(container);
            if len == 0 {
                return Ok(false);
            }
            let offset = n - start;
            Ok(offset % step == 0 && (0..len).contains(&(offset / step)))
        }
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        _ => values_equal(l, r) && !l.is_number(),
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> ScriptResult<bool> {
    Ok(match op {
        CmpOp::Eq => values_equal(l, r),
        CmpOp::NotEq => !values_equal(l, r),
        CmpOp::Lt => compare_values(l, r, "<")? == Ordering::Less && !has_nan(l, r),
        CmpOp::LtE => compare_values(l, r, "<=")? != Ordering::Greater && !has_nan(l, r),
        CmpOp::Gt => compare_values(l, r, ">")? == Ordering::Greater && !has_nan(l, r),
        CmpOp::GtE => compare_values(l, r, ">=")? != Ordering::Less && !has_nan(l, r),
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => identical(l, r),
        CmpOp::IsNot => !identical(l, r),
    })
}

fn has_nan(l: &Value, r: &Value) -> bool {
    matches!(l, Value::Float(f) if f.is_nan()) || matches!(r, Value::Float(f) if f.is_nan())
}

// =============================================================================
// Attributes and indexing
// =============================================================================

fn normalize_index(index: &Value, len: usize, what: &str) -> ScriptResult<usize> {
    let i = index.to_index().map_err(|_| {
        ScriptError::type_error(format!(
            "{} indices must be integers, not {}",
            what,
            index.type_name()
        ))
    })?;
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::new(
            ErrorKind::Index,
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

fn get_index(object: &Value, index: &Value) -> ScriptResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let i = normalize_index(index, chars.len(), "string")?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Range { start, step, .. } => {
            let i = normalize_index(index, range_len(object) as usize, "range object")?;
            Ok(Value::Int(start + step * i as i64))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_index(object: &Value, index: &Value, value: Value) -> ScriptResult<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(index, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn get_attribute(object: &Value, name: &str) -> ScriptResult<Value> {
    match object {
        Value::Module(module) => module.get(name).ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Attribute,
                format!("module '{}' has no attribute '{}'", module.name, name),
            )
        }),
        Value::List(items) => builtins::list_method(items, name).ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Attribute,
                format!("'list' object has no attribute '{}'", name),
            )
        }),
        Value::Str(text) => builtins::str_method(text, name).ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Attribute,
                format!("'str' object has no attribute '{}'", name),
            )
        }),
        other => Err(ScriptError::new(
            ErrorKind::Attribute,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;
    use std::cell::RefCell;
    use std::time::Duration;

    fn capture() -> (OutputSink, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        (
            Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string())),
            lines,
        )
    }

    async fn run(source: &str) -> (ScriptResult<()>, Vec<String>) {
        let (output, lines) = capture();
        let interpreter = Interpreter::new(ExecutionEnv {
            output,
            ..Default::default()
        });
        let program = parse(source).expect("parse");
        let result = interpreter.execute(&program).await;
        interpreter.clear();
        let lines = lines.borrow().clone();
        (result, lines)
    }

    fn run_local(source: &str) -> (ScriptResult<()>, Vec<String>) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, run(source))
    }

    #[test]
    fn test_arithmetic_and_print() {
        let (result, lines) = run_local("print(1 + 2 * 3, 7 // 2, -7 // 2, 7 % -3, 2 ** 10, 1 / 4)");
        result.expect("run");
        assert_eq!(lines, vec!["7 3 -4 -2 1024 0.25"]);
    }

    #[test]
    fn test_functions_defaults_and_recursion() {
        let source = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

def greet(name, punct='!'):
    return 'hi ' + name + punct

print(fact(5))
print(greet('bob'), greet('amy', '?'))
";
        let (result, lines) = run_local(source);
        result.expect("run");
        assert_eq!(lines, vec!["120", "hi bob! hi amy?"]);
    }

    #[test]
    fn test_loops_break_continue() {
        let source = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
n = 0
while True:
    n += 1
    if n == 3:
        break
print(total, n)
";
        let (result, lines) = run_local(source);
        result.expect("run");
        assert_eq!(lines, vec!["16 3"]);
    }

    #[test]
    fn test_global_statement() {
        let source = "\
count = 0
def bump():
    global count
    count = count + 1
bump()
bump()
print(count)
";
        let (result, lines) = run_local(source);
        result.expect("run");
        assert_eq!(lines, vec!["2"]);
    }

    #[test]
    fn test_lists_and_indexing() {
        let source = "\
items = [3, 1, 2]
items.append(5)
items[0] = 9
print(items, len(items), items[-1], 2 in items, 7 not in items)
";
        let (result, lines) = run_local(source);
        result.expect("run");
        assert_eq!(lines, vec!["[9, 1, 2, 5] 4 5 True True"]);
    }

    #[test]
    fn test_name_error_reports_line() {
        let (result, _) = run_local("x = 1\ny = x + missing\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.line, Some(2));
        assert_eq!(err.to_string(), "NameError: name 'missing' is not defined (line 2)");
    }

    #[test]
    fn test_error_inside_function_keeps_inner_line() {
        let source = "def f():\n    return 1 / 0\n\nf()\n";
        let (result, _) = run_local(source);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_async_def_requires_await() {
        let source = "\
async def work():
    print('ran')
    return 4

work()
x = await work()
print(x)
";
        let (result, lines) = run_local(source);
        result.expect("run");
        assert_eq!(
            lines,
            vec![
                "RuntimeWarning: coroutine 'work' was never awaited",
                "ran",
                "4"
            ]
        );
    }

    #[test]
    fn test_type_errors() {
        let (result, _) = run_local("x = 'a' + 1\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Type);
        let (result, _) = run_local("def f(a):\n    pass\nf(1, 2)\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("takes 1 positional"));
    }

    #[test]
    fn test_huge_repetition_is_an_overflow_error() {
        let (result, _) = run_local("x = [0] * 10 ** 18\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Overflow);
        let (result, _) = run_local("x = 10 ** 18 * 'a'\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Overflow);
        let (result, lines) = run_local("print('ab' * 3, [1] * 2, 'x' * -1 == '')\n");
        result.expect("run");
        assert_eq!(lines, vec!["ababab [1, 1] True"]);
    }

    #[test]
    fn test_recursion_limit() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let local = tokio::task::LocalSet::new();
        let result = local.block_on(&rt, async {
            let interpreter = Interpreter::new(ExecutionEnv {
                max_depth: 8,
                ..Default::default()
            });
            let program = parse("def f(n):\n    return f(n + 1)\nf(0)\n").expect("parse");
            let result = interpreter.execute(&program).await;
            interpreter.clear();
            result
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::Recursion);
    }

    #[test]
    fn test_interrupt_stops_infinite_loop() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let local = tokio::task::LocalSet::new();
        let interrupt = InterruptHandle::new();
        interrupt.interrupt();
        let result = local.block_on(&rt, async {
            let interpreter = Interpreter::new(ExecutionEnv {
                interrupt: interrupt.clone(),
                ..Default::default()
            });
            let program = parse("while True:\n    pass\n").expect("parse");
            interpreter.execute(&program).await
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_async_call_suspends_only_when_awaited() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (output, lines) = capture();
                let module = ModuleObject::new("clock");
                let log = output.clone();
                module.define_async("sleep", move |args| {
                    let log = log.clone();
                    async move {
                        let ms = args.first().map(|v| v.to_int()).transpose()?.unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                        log(&format!("slept {}", ms));
                        Ok(Value::None)
                    }
                    .boxed_local()
                });
                let mut modules = BTreeMap::new();
                modules.insert("clock".to_string(), module);
                let interpreter = Interpreter::new(ExecutionEnv {
                    output,
                    modules,
                    ..Default::default()
                });
                let program =
                    parse("import clock\nprint('a')\nawait clock.sleep(50)\nprint('b')\n")
                        .expect("parse");
                let start = tokio::time::Instant::now();
                interpreter.execute(&program).await.expect("run");
                assert!(start.elapsed() >= Duration::from_millis(50));
                assert_eq!(*lines.borrow(), vec!["a", "slept 50", "b"]);
                interpreter.clear();
            })
            .await;
    }

    #[test]
    fn test_import_errors() {
        let (result, _) = run_local("import nothing\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert_eq!(err.line, Some(1));
    }
}
